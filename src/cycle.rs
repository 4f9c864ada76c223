use std::{collections::HashMap, fmt::Display};

use log::{debug, warn};

use crate::{
    deps::DepSetResolver,
    graph::ConfigLookup,
    model::{spec::ModuleSpec, ModuleName},
    resolver::{ResolveError, SpecProvider},
};

/// A node of the module dependency graph: one module at one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleConfig {
    pub module: ModuleName,
    pub configuration: String,
}

impl ModuleConfig {
    pub fn new(module: impl Into<ModuleName>, configuration: impl Into<String>) -> Self {
        ModuleConfig {
            module: module.into(),
            configuration: configuration.into(),
        }
    }
}

impl Display for ModuleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.module, self.configuration)
    }
}

/// A closed walk: the first and last nodes are the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(Vec<ModuleConfig>);

impl Cycle {
    pub fn nodes(&self) -> &[ModuleConfig] {
        &self.0
    }
}

impl Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self.0.iter().map(ModuleConfig::to_string).collect();
        f.write_str(&labels.join(" -> "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Depth-first search over `module/configuration` nodes, reading specs at each module's current
/// checkout.
pub struct CycleDetector<'a, P: ?Sized> {
    specs: &'a P,
    loaded: HashMap<ModuleName, ModuleSpec>,
}

impl<'a, P> CycleDetector<'a, P>
where
    P: SpecProvider + ?Sized,
{
    pub fn new(specs: &'a P) -> Self {
        CycleDetector {
            specs,
            loaded: HashMap::new(),
        }
    }

    pub fn find_cycle(
        &mut self,
        module: &ModuleName,
        configuration: Option<&str>,
    ) -> Result<Option<Cycle>, ResolveError> {
        let start = ModuleConfig {
            module: module.clone(),
            configuration: self.target_configuration(module, configuration, "the root request")?,
        };
        let mut colors: HashMap<ModuleConfig, Color> = HashMap::new();
        let mut path: Vec<ModuleConfig> = Vec::new();
        self.visit(start, &mut colors, &mut path)
    }

    fn visit(
        &mut self,
        node: ModuleConfig,
        colors: &mut HashMap<ModuleConfig, Color>,
        path: &mut Vec<ModuleConfig>,
    ) -> Result<Option<Cycle>, ResolveError> {
        colors.insert(node.clone(), Color::Gray);
        path.push(node.clone());

        for target in self.edges(&node)? {
            match colors.get(&target) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| n == &target).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(target);
                    return Ok(Some(Cycle(cycle)));
                }
                Some(Color::Black) => {}
                None => {
                    if let Some(cycle) = self.visit(target, colors, path)? {
                        return Ok(Some(cycle));
                    }
                }
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        Ok(None)
    }

    fn edges(&mut self, node: &ModuleConfig) -> Result<Vec<ModuleConfig>, ResolveError> {
        let section = DepSetResolver::new(self.spec(&node.module)?).resolve(&node.configuration)?;
        let mut targets = Vec::with_capacity(section.deps.len());
        for dep in section.deps {
            let requester = format!("{node} (`{dep}`)");
            let configuration =
                self.target_configuration(&dep.name, dep.configuration.as_deref(), &requester)?;
            targets.push(ModuleConfig {
                module: dep.name,
                configuration,
            });
        }
        debug!(
            "{} -> [{}]",
            node,
            targets
                .iter()
                .map(ModuleConfig::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(targets)
    }

    fn target_configuration(
        &mut self,
        module: &ModuleName,
        requested: Option<&str>,
        requester: &str,
    ) -> Result<String, ResolveError> {
        let graph = self.spec(module)?.graph();
        let Some(requested) = requested else {
            return Ok(graph.default_configuration()?.to_string());
        };
        match graph.lookup(requested) {
            ConfigLookup::Found(configuration) => Ok(configuration),
            ConfigLookup::FellBackTo(configuration) => {
                warn!(
                    "{}: configuration `{}` requested by {} does not exist, using `{}`",
                    module, requested, requester, configuration
                );
                Ok(configuration)
            }
            ConfigLookup::Missing => Err(ResolveError::MissingConfiguration {
                module: module.clone(),
                configuration: requested.to_string(),
                requested_by: requester.to_string(),
            }),
        }
    }

    fn spec(&mut self, module: &ModuleName) -> Result<&ModuleSpec, ResolveError> {
        if !self.loaded.contains_key(module) {
            let spec = ModuleSpec::load(self.specs, module)?;
            self.loaded.insert(module.clone(), spec);
        }
        Ok(&self.loaded[module])
    }
}
