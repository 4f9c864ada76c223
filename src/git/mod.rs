pub mod repository;
pub mod workspace;

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::model::ModuleName;

pub use repository::LocalChangesPolicy;
pub use workspace::{FetchSettings, GitWorkspace, WorkspaceError};

/// A module checked out inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    pub name: ModuleName,
    pub workspace: PathBuf,
}

impl ModuleRef {
    pub fn new(name: ModuleName, workspace: &Path) -> Self {
        ModuleRef {
            name,
            workspace: workspace.to_path_buf(),
        }
    }

    /// Working copy of the module, `<workspace>/<module>`.
    pub fn path(&self) -> PathBuf {
        self.workspace.join(self.name.as_str())
    }
}

impl Display for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn module_ref_path() {
        let module = ModuleRef::new("core".into(), Path::new("/work"));
        assert_eq!(module.path(), PathBuf::from("/work/core"));
        assert_eq!(module.to_string(), "core (/work/core)");
    }
}
