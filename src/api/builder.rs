use std::{env, error::Error, path::PathBuf};

use crate::{
    config::ModweaveConfig,
    git::{GitWorkspace, LocalChangesPolicy},
    Modweave,
};

#[derive(Default)]
pub struct ModweaveBuilder {
    workspace: Option<PathBuf>,
    module_file_name: Option<PathBuf>,
    config_file: Option<PathBuf>,
    policy: LocalChangesPolicy,
}

impl ModweaveBuilder {
    /// Directory holding one checkout per module.
    ///
    /// Defaults to `workspace.dir` from the configuration, then the current directory.
    pub fn workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    /// Name of the spec file at the root of every module.
    ///
    /// Defaults to `module.toml`.
    pub fn module_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_file_name = Some(path.into());
        self
    }

    /// Location of the configuration file.
    ///
    /// Defaults to `$HOME/.modweave/config.toml`.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// What to do with modules that have local changes when they must be switched.
    pub fn local_changes_policy(mut self, policy: LocalChangesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn try_build(self) -> Result<Modweave, Box<dyn Error>> {
        let Self {
            workspace,
            module_file_name,
            config_file,
            policy,
        } = self;
        let config = ModweaveConfig::load(config_file.as_deref())?;

        let root = match workspace.or(config.workspace_dir) {
            Some(root) => root,
            None => env::current_dir()?,
        };
        let module_file_name = module_file_name.unwrap_or_else(|| PathBuf::from("module.toml"));

        let workspace = GitWorkspace::new(
            root,
            module_file_name,
            config.modules,
            config.default_protocol,
        )?
        .with_policy(policy)
        .with_fetch_settings(config.fetch);

        Ok(Modweave { workspace })
    }
}
