use std::{collections::HashMap, fmt::Display, path::Path};

use log::debug;
use thiserror::Error;
use toml::Value;

use crate::{
    graph::ConfigGraph,
    model::{
        configuration::{ConfigNode, DEFAULT_MARKER, FULL_BUILD},
        dep::Dep,
        value::RawValue,
        ModuleName, ParseError, StructureError,
    },
    resolver::SpecProvider,
};

pub const DEFAULT_SECTION: &str = "default";
const DEPS_KEY: &str = "deps";
const FORCE_KEY: &str = "force";
const INSTALL_KEY: &str = "install";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionName {
    /// Applies to every configuration of the module.
    Default,
    Configuration(String),
}

impl Display for SectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionName::Default => f.write_str(DEFAULT_SECTION),
            SectionName::Configuration(name) => f.write_str(name),
        }
    }
}

/// One raw entry of a `deps` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepEntry {
    Add(Dep),
    /// `-dep`: must be directly followed by a matching [`DepEntry::Add`].
    Remove(Dep),
}

impl DepEntry {
    pub fn parse(line: &str) -> Result<DepEntry, ParseError> {
        match line.trim().strip_prefix('-') {
            Some(removed) => Dep::parse(removed).map(DepEntry::Remove),
            None => Dep::parse(line).map(DepEntry::Add),
        }
    }

    pub fn dep(&self) -> &Dep {
        match self {
            DepEntry::Add(dep) | DepEntry::Remove(dep) => dep,
        }
    }

    pub fn name(&self) -> &ModuleName {
        &self.dep().name
    }

    fn to_raw(&self) -> RawValue {
        match self {
            DepEntry::Add(dep) => dep.to_raw(),
            DepEntry::Remove(dep) => RawValue::Str(format!("-{dep}")),
        }
    }
}

impl Display for DepEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepEntry::Add(dep) => write!(f, "{dep}"),
            DepEntry::Remove(dep) => write!(f, "-{dep}"),
        }
    }
}

/// The deps payload declared directly in one section, before any inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub force: Option<Vec<String>>,
    pub entries: Vec<DepEntry>,
}

impl Section {
    pub fn from_raw(raw: &RawValue) -> Result<Section, ParseError> {
        let mut section = Section {
            force: raw.get(FORCE_KEY).map(parse_force).transpose()?,
            entries: Vec::new(),
        };

        let items = match raw.get(DEPS_KEY) {
            None => return Ok(section),
            Some(RawValue::List(items)) => items,
            Some(_) => {
                return Err(ParseError::UnexpectedValue {
                    key: DEPS_KEY.to_string(),
                    expected: "a list",
                })
            }
        };

        for item in items {
            if let Some(force) = force_pseudo_entry(item) {
                let force = parse_force(&force)?;
                section.force.get_or_insert(force);
                continue;
            }
            let entry = match item {
                RawValue::Str(line) => DepEntry::parse(line)?,
                RawValue::Map(_) => {
                    let dep = Dep::from_raw_map(item)?;
                    match dep.name.as_str().strip_prefix('-') {
                        Some(name) => DepEntry::Remove(Dep {
                            name: ModuleName::from(name),
                            ..dep
                        }),
                        None => DepEntry::Add(dep),
                    }
                }
                RawValue::List(_) => {
                    return Err(ParseError::UnexpectedValue {
                        key: DEPS_KEY.to_string(),
                        expected: "a string or a table per entry",
                    })
                }
            };
            section.entries.push(entry);
        }
        Ok(section)
    }
}

fn force_pseudo_entry(item: &RawValue) -> Option<RawValue> {
    match item {
        RawValue::Str(line) => line
            .trim()
            .strip_prefix("force:")
            .map(|rest| RawValue::Str(rest.to_string())),
        RawValue::Map(_) => item.get(FORCE_KEY).cloned(),
        RawValue::List(_) => None,
    }
}

fn parse_force(raw: &RawValue) -> Result<Vec<String>, ParseError> {
    let candidates: Vec<String> = match raw {
        RawValue::Str(s) => s.split(',').map(|c| c.trim().to_string()).collect(),
        RawValue::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| ParseError::UnexpectedValue {
                        key: FORCE_KEY.to_string(),
                        expected: "a list of strings",
                    })
            })
            .collect::<Result<_, _>>()?,
        RawValue::Map(_) => {
            return Err(ParseError::UnexpectedValue {
                key: FORCE_KEY.to_string(),
                expected: "a string or a list of strings",
            })
        }
    };
    Ok(candidates.into_iter().filter(|c| !c.is_empty()).collect())
}

fn parse_install(raw: &RawValue) -> Result<Vec<String>, ParseError> {
    match raw {
        RawValue::Str(s) => Ok(vec![s.trim().to_string()]),
        RawValue::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or_else(|| ParseError::UnexpectedValue {
                        key: INSTALL_KEY.to_string(),
                        expected: "a list of strings",
                    })
            })
            .collect(),
        RawValue::Map(_) => Err(ParseError::UnexpectedValue {
            key: INSTALL_KEY.to_string(),
            expected: "a list of strings",
        }),
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("Failed to read the spec of {module}: {source}")]
    Provider {
        module: ModuleName,
        #[source]
        source: anyhow::Error,
    },
}

/// Typed view of one module's spec: the configuration graph plus every section's own deps.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    name: ModuleName,
    graph: ConfigGraph,
    default_section: Section,
    sections: HashMap<String, Section>,
    install: HashMap<SectionName, Vec<String>>,
}

impl ModuleSpec {
    pub fn load<P>(provider: &P, module: &ModuleName) -> Result<ModuleSpec, LoadError>
    where
        P: SpecProvider + ?Sized,
    {
        let provider_error = |source| LoadError::Provider {
            module: module.clone(),
            source,
        };
        let invalid = |section: &SectionName, source| StructureError::InvalidEntry {
            module: module.clone(),
            section: section.to_string(),
            source,
        };

        let nodes = provider
            .configurations(module)
            .map_err(provider_error)?
            .iter()
            .map(|line| {
                ConfigNode::parse(line)
                    .map_err(|e| invalid(&SectionName::Configuration(line.clone()), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let graph = ConfigGraph::build(module.clone(), nodes)?;

        let mut names = vec![SectionName::Default];
        names.extend(
            graph
                .nodes()
                .iter()
                .map(|node| SectionName::Configuration(node.name.clone())),
        );

        let mut default_section = Section::default();
        let mut sections = HashMap::new();
        let mut install = HashMap::new();
        for name in names {
            let section = match provider.deps_section(module, &name).map_err(provider_error)? {
                Some(raw) => Section::from_raw(&raw).map_err(|e| invalid(&name, e))?,
                None => Section::default(),
            };
            if let Some(raw) = provider
                .install_section(module, &name)
                .map_err(provider_error)?
            {
                install.insert(
                    name.clone(),
                    parse_install(&raw).map_err(|e| invalid(&name, e))?,
                );
            }
            match name {
                SectionName::Default => default_section = section,
                SectionName::Configuration(configuration) => {
                    sections.insert(configuration, section);
                }
            }
        }

        Ok(ModuleSpec {
            name: module.clone(),
            graph,
            default_section,
            sections,
            install,
        })
    }

    pub fn name(&self) -> &ModuleName {
        &self.name
    }

    pub fn graph(&self) -> &ConfigGraph {
        &self.graph
    }

    pub fn section(&self, name: &SectionName) -> Option<&Section> {
        match name {
            SectionName::Default => Some(&self.default_section),
            SectionName::Configuration(configuration) => self.sections.get(configuration),
        }
    }

    pub fn section_mut(&mut self, name: &SectionName) -> Option<&mut Section> {
        match name {
            SectionName::Default => Some(&mut self.default_section),
            SectionName::Configuration(configuration) => self.sections.get_mut(configuration),
        }
    }

    /// Own deps of a configuration; empty for undeclared configurations.
    pub fn own_section(&self, configuration: &str) -> &Section {
        static EMPTY: Section = Section {
            force: None,
            entries: Vec::new(),
        };
        self.sections.get(configuration).unwrap_or(&EMPTY)
    }

    pub fn default_section(&self) -> &Section {
        &self.default_section
    }

    pub fn install(&self, name: &SectionName) -> &[String] {
        self.install.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// A decoded `module.toml`. Top-level `default` is the default section, every other top-level
/// key is a configuration declaration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDocument {
    root: RawValue,
}

impl SpecDocument {
    pub fn from_file(path: &Path) -> Result<SpecDocument, ParseError> {
        debug!("Reading module spec from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        SpecDocument::from_toml_str(&contents)
    }

    pub fn from_toml_str(data: &str) -> Result<SpecDocument, ParseError> {
        let root = RawValue::from(toml::from_str::<Value>(data)?);
        if let RawValue::Map(entries) = &root {
            if let Some((key, _)) = entries.iter().find(|(_, v)| !v.is_map()) {
                return Err(ParseError::UnexpectedValue {
                    key: key.clone(),
                    expected: "a table",
                });
            }
        }
        Ok(SpecDocument { root })
    }

    /// Stand-in for modules without a spec file: a single `full-build` configuration without
    /// dependencies.
    pub fn implicit() -> SpecDocument {
        SpecDocument {
            root: RawValue::Map(vec![(
                format!("{FULL_BUILD} {DEFAULT_MARKER}"),
                RawValue::Map(Vec::new()),
            )]),
        }
    }

    pub fn configuration_lines(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| key != DEFAULT_SECTION)
            .collect()
    }

    /// The section table restricted to `force` and `deps`.
    pub fn deps_section(&self, name: &SectionName) -> Option<RawValue> {
        self.section(name).map(|section| {
            RawValue::Map(
                [FORCE_KEY, DEPS_KEY]
                    .iter()
                    .filter_map(|key| section.get(key).map(|v| (key.to_string(), v.clone())))
                    .collect(),
            )
        })
    }

    pub fn install_section(&self, name: &SectionName) -> Option<RawValue> {
        self.section(name)
            .and_then(|section| section.get(INSTALL_KEY))
            .cloned()
    }

    /// Rewrites every section's `deps` list from `spec`, keeping `force:` pseudo-entries and all
    /// other keys as they were.
    pub fn update_deps(&mut self, spec: &ModuleSpec) {
        let mut names = vec![SectionName::Default];
        names.extend(
            spec.graph()
                .nodes()
                .iter()
                .map(|node| SectionName::Configuration(node.name.clone())),
        );

        for name in names {
            let Some(section) = spec.section(&name) else {
                continue;
            };
            if self.section(&name).is_none() {
                if section.entries.is_empty() {
                    continue;
                }
                self.root.set(&name.to_string(), RawValue::Map(Vec::new()));
            }
            let Some(raw) = self.section_mut(&name) else {
                continue;
            };

            let mut items: Vec<RawValue> = raw
                .get(DEPS_KEY)
                .and_then(RawValue::as_list)
                .unwrap_or_default()
                .iter()
                .filter(|item| force_pseudo_entry(item).is_some())
                .cloned()
                .collect();
            items.extend(section.entries.iter().map(DepEntry::to_raw));

            if items.is_empty() {
                raw.remove(DEPS_KEY);
            } else {
                raw.set(DEPS_KEY, RawValue::List(items));
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ParseError> {
        Ok(toml::to_string_pretty(&Value::from(self.root.clone()))?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ParseError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn entries(&self) -> &[(String, RawValue)] {
        match &self.root {
            RawValue::Map(entries) => entries,
            _ => &[],
        }
    }

    fn section_key(&self, name: &SectionName) -> Option<String> {
        match name {
            SectionName::Default => self
                .entries()
                .iter()
                .any(|(key, _)| key == DEFAULT_SECTION)
                .then(|| DEFAULT_SECTION.to_string()),
            SectionName::Configuration(configuration) => self
                .entries()
                .iter()
                .map(|(key, _)| key)
                .find(|key| {
                    key.as_str() != DEFAULT_SECTION
                        && ConfigNode::parse(key).is_ok_and(|node| &node.name == configuration)
                })
                .cloned(),
        }
    }

    fn section(&self, name: &SectionName) -> Option<&RawValue> {
        let key = self.section_key(name)?;
        self.root.get(&key)
    }

    fn section_mut(&mut self, name: &SectionName) -> Option<&mut RawValue> {
        let key = self.section_key(name)?;
        match &mut self.root {
            RawValue::Map(entries) => entries
                .iter_mut()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }
}
