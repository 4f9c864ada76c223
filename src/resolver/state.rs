use std::fmt::Display;

use crate::model::{dep::Dep, ModuleName};

/// The edge that asked for a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    /// The module named on the command line.
    Root,
    Dep {
        module: ModuleName,
        configuration: String,
        dep: Dep,
    },
}

impl Display for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requester::Root => f.write_str("the root request"),
            Requester::Dep {
                module,
                configuration,
                dep,
            } => write!(f, "{module}/{configuration} (`{dep}`)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeishSource {
    /// The root module stays on whatever its working copy has checked out.
    WorkingCopy,
    Explicit(Requester),
    /// First existing candidate of the requester's force list.
    Forced(Requester),
    DefaultBranch(Requester),
}

impl TreeishSource {
    pub fn is_explicit(&self) -> bool {
        matches!(self, TreeishSource::WorkingCopy | TreeishSource::Explicit(_))
    }
}

impl Display for TreeishSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeishSource::WorkingCopy => f.write_str("the working copy"),
            TreeishSource::Explicit(r) => write!(f, "{r}"),
            TreeishSource::Forced(r) => write!(f, "the force list of {r}"),
            TreeishSource::DefaultBranch(r) => write!(f, "the default branch, for {r}"),
        }
    }
}

/// What the closure has settled on for one module so far.
#[derive(Debug, Clone)]
pub struct ResolutionState {
    pub configuration: String,
    pub configuration_requested_by: Requester,
    pub treeish: String,
    pub treeish_source: TreeishSource,
    /// The (configuration, treeish) the module's children were last expanded under.
    expanded: Option<(String, String)>,
}

impl ResolutionState {
    pub fn new(
        configuration: String,
        configuration_requested_by: Requester,
        treeish: String,
        treeish_source: TreeishSource,
    ) -> Self {
        ResolutionState {
            configuration,
            configuration_requested_by,
            treeish,
            treeish_source,
            expanded: None,
        }
    }

    pub fn needs_expansion(&self) -> bool {
        self.expanded.as_ref() != Some(&(self.configuration.clone(), self.treeish.clone()))
    }

    pub fn mark_expanded(&mut self) {
        self.expanded = Some((self.configuration.clone(), self.treeish.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_tracks_configuration_and_treeish() {
        let mut state = ResolutionState::new(
            "client".to_string(),
            Requester::Root,
            "master".to_string(),
            TreeishSource::WorkingCopy,
        );
        assert!(state.needs_expansion());
        state.mark_expanded();
        assert!(!state.needs_expansion());

        state.configuration = "full-build".to_string();
        assert!(state.needs_expansion());
        state.mark_expanded();

        state.treeish = "develop".to_string();
        assert!(state.needs_expansion());
    }

    #[test]
    fn requester_names_the_edge() {
        let requester = Requester::Dep {
            module: "app".into(),
            configuration: "client".to_string(),
            dep: Dep::new("core").with_treeish("develop"),
        };
        assert_eq!(requester.to_string(), "app/client (`core@develop`)");
        assert!(TreeishSource::Explicit(requester.clone()).is_explicit());
        assert!(!TreeishSource::Forced(requester).is_explicit());
    }
}
