//! Transitive closure of a root module.
//!
//! Every module of the closure is pinned to one configuration and one treeish. Repeated requests
//! for a module are reconciled: configurations are escalated to the smallest configuration
//! covering every request, treeishes must agree once explicitly requested.

pub mod state;

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    deps::DepSetResolver,
    graph::{ConfigLookup, GraphError},
    model::{
        dep::Dep,
        spec::{LoadError, ModuleSpec, SectionName},
        value::RawValue,
        ModuleName, StructureError,
    },
};

use self::state::{Requester, ResolutionState, TreeishSource};

/// Force list candidates that stand for the root module's current branch.
pub const CURRENT_BRANCH_MARKERS: [&str; 2] = ["%CURRENT_BRANCH%", "$CURRENT_BRANCH"];

/// Reads the spec of a module at whatever treeish the module currently has checked out.
pub trait SpecProvider {
    fn configurations(&self, module: &ModuleName) -> anyhow::Result<Vec<String>>;

    fn deps_section(
        &self,
        module: &ModuleName,
        section: &SectionName,
    ) -> anyhow::Result<Option<RawValue>>;

    fn install_section(
        &self,
        module: &ModuleName,
        section: &SectionName,
    ) -> anyhow::Result<Option<RawValue>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchLocation {
    Local,
    Remote,
}

pub trait VersionControl {
    fn branch_exists(
        &self,
        module: &ModuleName,
        branch: &str,
        location: BranchLocation,
    ) -> anyhow::Result<bool>;

    fn current_branch(&self, module: &ModuleName) -> anyhow::Result<String>;

    fn default_branch(&self, module: &ModuleName) -> anyhow::Result<String>;

    /// Switches a module to `treeish` and returns the treeish left checked out, which differs
    /// from `treeish` when the implementation keeps a module with local changes where it is.
    fn checkout(&self, module: &ModuleName, treeish: &str) -> anyhow::Result<String>;

    fn has_local_changes(&self, module: &ModuleName) -> anyhow::Result<bool>;

    /// Makes a module available locally: clones it when missing, fetches it otherwise.
    fn fetch(&self, module: &ModuleName) -> anyhow::Result<()>;

    /// Fetches modules that have no ordering constraint between them. Implementations may do
    /// this in parallel.
    fn prefetch(&self, modules: &[ModuleName]) -> anyhow::Result<()> {
        modules.iter().try_for_each(|module| self.fetch(module))
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("{source} (requested by {first_requested_by} and {second_requested_by})")]
    IncompatibleConfigurations {
        #[source]
        source: GraphError,
        first_requested_by: String,
        second_requested_by: String,
    },
    #[error("Conflicting treeish for {module}: `{first}` requested by {first_requested_by}, `{second}` requested by {second_requested_by}")]
    TreeishConflict {
        module: ModuleName,
        first: String,
        first_requested_by: String,
        second: String,
        second_requested_by: String,
    },
    #[error("{module}: configuration `{configuration}` requested by {requested_by} does not exist and there is no full-build to fall back to")]
    MissingConfiguration {
        module: ModuleName,
        configuration: String,
        requested_by: String,
    },
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl From<LoadError> for ResolveError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Structure(error) => ResolveError::Structure(error),
            LoadError::Provider { module, source } => {
                let source = source.context(format!("Failed to read the spec of {module}"));
                ResolveError::Collaborator(source)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedModule {
    pub treeish: String,
    pub configuration: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    root: ModuleName,
    modules: BTreeMap<ModuleName, PinnedModule>,
}

impl Closure {
    pub fn root(&self) -> &ModuleName {
        &self.root
    }

    pub fn get(&self, module: &ModuleName) -> Option<&PinnedModule> {
        self.modules.get(module)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModuleName, &PinnedModule)> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

pub struct ClosureResolver<'a, P: ?Sized, V: ?Sized> {
    specs: &'a P,
    vcs: &'a V,
}

impl<'a, P, V> ClosureResolver<'a, P, V>
where
    P: SpecProvider + ?Sized,
    V: VersionControl + ?Sized,
{
    pub fn new(specs: &'a P, vcs: &'a V) -> Self {
        ClosureResolver { specs, vcs }
    }

    /// Expands the closure of `root` at `configuration` (its default configuration when `None`).
    ///
    /// The root module is not checked out: it stays on `current_branch`, which is also what
    /// `%CURRENT_BRANCH%` force candidates resolve to. Any collaborator error aborts the run.
    pub fn resolve(
        &self,
        root: &ModuleName,
        configuration: Option<&str>,
        current_branch: &str,
    ) -> Result<Closure, ResolveError> {
        let mut run = Run {
            specs: self.specs,
            vcs: self.vcs,
            current_branch,
            states: HashMap::new(),
            loaded: HashMap::new(),
            queue: VecDeque::new(),
        };

        let configuration = run.settle_configuration(root, configuration, &Requester::Root)?;
        run.states.insert(
            root.clone(),
            ResolutionState::new(
                configuration,
                Requester::Root,
                current_branch.to_string(),
                TreeishSource::WorkingCopy,
            ),
        );
        run.queue.push_back(root.clone());

        while let Some(module) = run.queue.pop_front() {
            run.expand(&module)?;
        }

        let modules = run
            .states
            .into_iter()
            .map(|(name, state)| {
                (
                    name,
                    PinnedModule {
                        treeish: state.treeish,
                        configuration: state.configuration,
                    },
                )
            })
            .collect();
        Ok(Closure {
            root: root.clone(),
            modules,
        })
    }
}

struct Run<'r, P: ?Sized, V: ?Sized> {
    specs: &'r P,
    vcs: &'r V,
    current_branch: &'r str,
    states: HashMap<ModuleName, ResolutionState>,
    /// Specs at the current checkout of each module.
    loaded: HashMap<ModuleName, ModuleSpec>,
    queue: VecDeque<ModuleName>,
}

impl<'r, P, V> Run<'r, P, V>
where
    P: SpecProvider + ?Sized,
    V: VersionControl + ?Sized,
{
    fn spec(&mut self, module: &ModuleName) -> Result<&ModuleSpec, ResolveError> {
        if !self.loaded.contains_key(module) {
            let spec = ModuleSpec::load(self.specs, module)?;
            self.loaded.insert(module.clone(), spec);
        }
        Ok(&self.loaded[module])
    }

    fn checkout(&mut self, module: &ModuleName, treeish: &str) -> Result<String, ResolveError> {
        let actual = self.vcs.checkout(module, treeish)?;
        self.loaded.remove(module);
        if actual != treeish {
            warn!(
                "{} stays on {} instead of {}, its deps are read from there",
                module, actual, treeish
            );
        }
        Ok(actual)
    }

    fn settle_configuration(
        &mut self,
        module: &ModuleName,
        requested: Option<&str>,
        requester: &Requester,
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

    fn expand(&mut self, module: &ModuleName) -> Result<(), ResolveError> {
        let Some(state) = self.states.get(module).filter(|s| s.needs_expansion()) else {
            return Ok(());
        };
        let configuration = state.configuration.clone();
        debug!("Expanding {}/{} at {}", module, configuration, state.treeish);

        let section = DepSetResolver::new(self.spec(module)?).resolve(&configuration)?;
        if let Some(state) = self.states.get_mut(module) {
            state.mark_expanded();
        }

        let mut fresh: Vec<ModuleName> = Vec::new();
        for dep in &section.deps {
            if !self.states.contains_key(&dep.name) && !fresh.contains(&dep.name) {
                fresh.push(dep.name.clone());
            }
        }
        if !fresh.is_empty() {
            self.vcs.prefetch(&fresh)?;
        }

        for dep in &section.deps {
            let requester = Requester::Dep {
                module: module.clone(),
                configuration: configuration.clone(),
                dep: dep.clone(),
            };
            if self.states.contains_key(&dep.name) {
                self.reconcile_treeish(dep, &requester)?;
                self.reconcile_configuration(dep, &requester)?;
            } else {
                self.discover(dep, section.force.as_deref(), requester)?;
            }
        }
        Ok(())
    }

    fn discover(
        &mut self,
        dep: &Dep,
        force: Option<&[String]>,
        requester: Requester,
    ) -> Result<(), ResolveError> {
        let (treeish, source) = match &dep.treeish {
            Some(treeish) => (treeish.clone(), TreeishSource::Explicit(requester.clone())),
            None => self.forced_treeish(&dep.name, force, &requester)?,
        };
        debug!("Checking out {} at {} ({})", dep.name, treeish, source);
        let treeish = self.checkout(&dep.name, &treeish)?;

        let configuration =
            self.settle_configuration(&dep.name, dep.configuration.as_deref(), &requester)?;
        self.states.insert(
            dep.name.clone(),
            ResolutionState::new(configuration, requester, treeish, source),
        );
        self.queue.push_back(dep.name.clone());
        Ok(())
    }

    fn forced_treeish(
        &self,
        module: &ModuleName,
        force: Option<&[String]>,
        requester: &Requester,
    ) -> Result<(String, TreeishSource), ResolveError> {
        for candidate in force.unwrap_or_default() {
            let branch = if CURRENT_BRANCH_MARKERS.contains(&candidate.as_str()) {
                self.current_branch
            } else {
                candidate.as_str()
            };
            if self
                .vcs
                .branch_exists(module, branch, BranchLocation::Local)?
                || self
                    .vcs
                    .branch_exists(module, branch, BranchLocation::Remote)?
            {
                return Ok((branch.to_string(), TreeishSource::Forced(requester.clone())));
            }
            debug!("{}: force candidate `{}` does not exist", module, branch);
        }
        Ok((
            self.vcs.default_branch(module)?,
            TreeishSource::DefaultBranch(requester.clone()),
        ))
    }

    fn reconcile_treeish(&mut self, dep: &Dep, requester: &Requester) -> Result<(), ResolveError> {
        let Some(requested) = &dep.treeish else {
            return Ok(());
        };
        let Some(state) = self.states.get_mut(&dep.name) else {
            return Ok(());
        };

        if state.treeish_source.is_explicit() {
            if &state.treeish != requested {
                return Err(ResolveError::TreeishConflict {
                    module: dep.name.clone(),
                    first: state.treeish.clone(),
                    first_requested_by: state.treeish_source.to_string(),
                    second: requested.clone(),
                    second_requested_by: requester.to_string(),
                });
            }
            return Ok(());
        }

        let previous = std::mem::replace(&mut state.treeish, requested.clone());
        state.treeish_source = TreeishSource::Explicit(requester.clone());
        if &previous == requested {
            return Ok(());
        }
        let configuration = state.configuration.clone();
        let configuration_requested_by = state.configuration_requested_by.clone();

        info!(
            "Switching {} from {} to {} requested by {}",
            dep.name, previous, requested, requester
        );
        let actual = self.checkout(&dep.name, requested)?;
        let configuration = self.settle_configuration(
            &dep.name,
            Some(&configuration),
            &configuration_requested_by,
        )?;
        if let Some(state) = self.states.get_mut(&dep.name) {
            state.treeish = actual;
            state.configuration = configuration;
        }
        self.queue.push_back(dep.name.clone());
        Ok(())
    }

    fn reconcile_configuration(
        &mut self,
        dep: &Dep,
        requester: &Requester,
    ) -> Result<(), ResolveError> {
        let requested =
            self.settle_configuration(&dep.name, dep.configuration.as_deref(), requester)?;
        let Some(state) = self.states.get(&dep.name) else {
            return Ok(());
        };
        let current = state.configuration.clone();
        let current_requested_by = state.configuration_requested_by.clone();
        if requested == current {
            return Ok(());
        }

        let graph = self.spec(&dep.name)?.graph();
        if graph.is_ancestor(&requested, &current) {
            return Ok(());
        }
        let settled = if graph.is_ancestor(&current, &requested) {
            requested
        } else {
            graph
                .lowest_common_ancestor(&current, &requested)
                .map_err(|source| ResolveError::IncompatibleConfigurations {
                    source,
                    first_requested_by: current_requested_by.to_string(),
                    second_requested_by: requester.to_string(),
                })?
        };

        info!(
            "Escalating {} from {} to {} for {}",
            dep.name, current, settled, requester
        );
        if let Some(state) = self.states.get_mut(&dep.name) {
            state.configuration = settled;
            state.configuration_requested_by = requester.clone();
        }
        self.queue.push_back(dep.name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::testing::InMemoryWorkspace;

    fn pinned(treeish: &str, configuration: &str) -> Option<PinnedModule> {
        Some(PinnedModule {
            treeish: treeish.to_string(),
            configuration: configuration.to_string(),
        })
    }

    fn resolve(
        workspace: &InMemoryWorkspace,
        root: &str,
        configuration: Option<&str>,
    ) -> Result<Closure, ResolveError> {
        ClosureResolver::new(workspace, workspace).resolve(&root.into(), configuration, "master")
    }

    const B: &str = r#"
        ["client *default"]
        ["full-build > client"]
        deps = ["tools"]
    "#;

    #[test]
    fn escalates_to_the_covering_configuration() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["Y", "Z"]"#)
            .with_module("Y", r#"["full-build"]
                deps = ["B/full-build"]"#)
            .with_module("Z", r#"["full-build"]
                deps = ["B/client"]"#)
            .with_module("B", B)
            .with_module("tools", r#"["full-build"]"#);

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"B".into()).cloned(), pinned("master", "full-build"));
        // only required by full-build, expanded after the escalation
        assert!(closure.get(&"tools".into()).is_some());
        assert_eq!(closure.len(), 5);
    }

    #[test]
    fn escalation_does_not_depend_on_request_order() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["Z", "Y"]"#)
            .with_module("Y", r#"["full-build"]
                deps = ["B/full-build"]"#)
            .with_module("Z", r#"["full-build"]
                deps = ["B/client"]"#)
            .with_module("B", B)
            .with_module("tools", r#"["full-build"]"#);

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"B".into()).cloned(), pinned("master", "full-build"));
    }

    #[test]
    fn sibling_configurations_escalate_to_their_lowest_common_ancestor() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["L/client1", "R"]"#)
            .with_module("R", r#"["full-build"]
                deps = ["L/client2"]"#)
            .with_module(
                "L",
                r#"
                ["client1 *default"]
                ["client2"]
                ["sdk > client1, client2"]
                ["full-build > sdk"]
                "#,
            );

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"L".into()).cloned(), pinned("master", "sdk"));
    }

    #[test]
    fn disjoint_configurations_are_a_graph_error() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["L/client1", "R"]"#)
            .with_module("R", r#"["full-build"]
                deps = ["L/client2"]"#)
            .with_module(
                "L",
                r#"
                ["client1 *default"]
                ["client2"]
                "#,
            );

        assert!(matches!(
            resolve(&workspace, "A", None),
            Err(ResolveError::IncompatibleConfigurations { .. })
        ));
    }

    #[test]
    fn explicit_treeish_conflict() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X", "Y"]"#)
            .with_module("X", r#"["full-build"]
                deps = ["C@t1"]"#)
            .with_module("Y", r#"["full-build"]
                deps = ["C@t2"]"#)
            .with_treeish("C", "t1", r#"["full-build"]"#)
            .with_treeish("C", "t2", r#"["full-build"]"#);

        match resolve(&workspace, "A", None) {
            Err(ResolveError::TreeishConflict {
                module,
                first,
                second,
                first_requested_by,
                second_requested_by,
            }) => {
                assert_eq!(module.as_str(), "C");
                assert_eq!((first.as_str(), second.as_str()), ("t1", "t2"));
                assert_eq!(first_requested_by, "X/full-build (`C@t1`)");
                assert_eq!(second_requested_by, "Y/full-build (`C@t2`)");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn explicit_treeish_wins_over_default_branch() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X", "Y"]"#)
            .with_module("X", r#"["full-build"]
                deps = ["C"]"#)
            .with_module("Y", r#"["full-build"]
                deps = ["C@release"]"#)
            .with_module("C", r#"["full-build"]"#)
            .with_treeish(
                "C",
                "release",
                r#"["full-build"]
                deps = ["extra"]"#,
            )
            .with_module("extra", r#"["full-build"]"#);

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"C".into()).cloned(), pinned("release", "full-build"));
        // children of the new treeish are expanded
        assert!(closure.get(&"extra".into()).is_some());
        assert_eq!(
            workspace.checkouts(),
            vec![
                ("X".to_string(), "master".to_string()),
                ("Y".to_string(), "master".to_string()),
                ("C".to_string(), "master".to_string()),
                ("C".to_string(), "release".to_string()),
                ("extra".to_string(), "master".to_string()),
            ]
        );
    }

    #[test]
    fn root_stays_on_its_working_copy() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X"]"#)
            .with_module("X", r#"["full-build"]
                deps = ["A@develop"]"#);

        assert!(matches!(
            resolve(&workspace, "A", None),
            Err(ResolveError::TreeishConflict { .. })
        ));
    }

    #[test]
    fn force_list_picks_first_existing_branch() {
        let workspace = InMemoryWorkspace::default()
            .with_module(
                "A",
                r#"["full-build"]
                force = "missing, %CURRENT_BRANCH%"
                deps = ["X", "Y@master"]"#,
            )
            .with_module("X", r#"["full-build"]"#)
            .with_local_branch("X", "feature", r#"["full-build"]"#)
            .with_module("Y", r#"["full-build"]"#);

        let closure = ClosureResolver::new(&workspace, &workspace)
            .resolve(&"A".into(), None, "feature")
            .unwrap();
        assert_eq!(closure.get(&"X".into()).cloned(), pinned("feature", "full-build"));
        assert_eq!(closure.get(&"Y".into()).cloned(), pinned("master", "full-build"));
        assert_eq!(closure.get(&"A".into()).cloned(), pinned("feature", "full-build"));
    }

    #[test]
    fn force_list_falls_back_to_default_branch() {
        let workspace = InMemoryWorkspace::default()
            .with_module(
                "A",
                r#"["full-build"]
                force = ["hotfix"]
                deps = ["X"]"#,
            )
            .with_module("X", r#"["full-build"]"#);

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"X".into()).cloned(), pinned("master", "full-build"));
    }

    #[test]
    fn dollar_current_branch_marker() {
        let workspace = InMemoryWorkspace::default()
            .with_module(
                "A",
                r#"["full-build"]
                force = ["$CURRENT_BRANCH", "develop"]
                deps = ["X"]"#,
            )
            .with_module("X", r#"["full-build"]"#)
            .with_treeish("X", "release/2.0", r#"["full-build"]"#)
            .with_treeish("X", "develop", r#"["full-build"]"#);

        let closure = ClosureResolver::new(&workspace, &workspace)
            .resolve(&"A".into(), None, "release/2.0")
            .unwrap();
        assert_eq!(
            closure.get(&"X".into()).cloned(),
            pinned("release/2.0", "full-build")
        );

        let closure = ClosureResolver::new(&workspace, &workspace)
            .resolve(&"A".into(), None, "feature")
            .unwrap();
        assert_eq!(closure.get(&"X".into()).cloned(), pinned("develop", "full-build"));
    }

    #[test]
    fn module_left_on_its_checkout_is_pinned_there() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["C@release"]"#)
            .with_module("C", r#"["full-build"]"#)
            .with_treeish(
                "C",
                "release",
                r#"["full-build"]
                deps = ["extra"]"#,
            )
            .with_local_changes("C");

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"C".into()).cloned(), pinned("master", "full-build"));
        assert!(closure.get(&"extra".into()).is_none());
    }

    #[test]
    fn missing_configuration_falls_back_to_full_build() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X/client"]"#)
            .with_module("X", r#"["full-build"]"#);

        let closure = resolve(&workspace, "A", None).unwrap();
        assert_eq!(closure.get(&"X".into()).cloned(), pinned("master", "full-build"));
    }

    #[test]
    fn missing_configuration_without_full_build() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X/server"]"#)
            .with_module("X", r#"["client"]"#);

        match resolve(&workspace, "A", None) {
            Err(ResolveError::MissingConfiguration {
                module,
                configuration,
                requested_by,
            }) => {
                assert_eq!(module.as_str(), "X");
                assert_eq!(configuration, "server");
                assert_eq!(requested_by, "A/full-build (`X/server`)");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn new_modules_are_prefetched_once() {
        let workspace = InMemoryWorkspace::default()
            .with_module("A", r#"["full-build"]
                deps = ["X", "Y"]"#)
            .with_module("X", r#"["full-build"]
                deps = ["Y"]"#)
            .with_module("Y", r#"["full-build"]"#);

        resolve(&workspace, "A", None).unwrap();
        assert_eq!(
            workspace.prefetched(),
            vec![ModuleName::from("X"), ModuleName::from("Y")]
        );
    }

    #[test]
    fn collaborator_errors_abort_the_run() {
        let workspace = InMemoryWorkspace::default().with_module(
            "A",
            r#"["full-build"]
            deps = ["unknown"]"#,
        );

        assert!(matches!(
            resolve(&workspace, "A", None),
            Err(ResolveError::Collaborator(_))
        ));
    }
}
