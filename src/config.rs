use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment, File, FileFormat};
use log::debug;
use serde::Deserialize;

use crate::{
    git::FetchSettings,
    model::{
        coordinate::{ModuleLocation, Protocol},
        ModuleName,
    },
};

pub struct ModweaveConfig {
    pub workspace_dir: Option<PathBuf>,
    pub default_protocol: Protocol,
    pub fetch: FetchSettings,
    pub modules: HashMap<ModuleName, ModuleLocation>,
}

impl ModweaveConfig {
    /// Loads `file`, or `$HOME/.modweave/config.toml` when none is given, with `MODWEAVE_*`
    /// environment variables on top.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file = file.map(Path::to_path_buf).or_else(default_config_file);
        let raw_config = RawConfig::load(file.as_deref(), None)?;
        Self::from_raw(raw_config)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let defaults = FetchSettings::default();
        let mut modules = HashMap::with_capacity(raw_config.modules.len());
        for (name, location) in raw_config.modules {
            modules.insert(ModuleName::new(name), ModuleLocation::parse(&location)?);
        }
        Ok(Self {
            workspace_dir: raw_config.workspace.dir,
            default_protocol: raw_config.git.protocol.unwrap_or_default(),
            fetch: FetchSettings {
                jobs: raw_config.fetch.jobs.unwrap_or(defaults.jobs),
                retries: raw_config.fetch.retries.unwrap_or(defaults.retries),
            },
            modules,
        })
    }
}

fn default_config_file() -> Option<PathBuf> {
    let path = home::home_dir()?.join(".modweave").join("config.toml");
    debug!("Looking for configuration in {}", path.display());
    Some(path)
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    workspace: WorkspaceConfig,
    #[serde(default)]
    git: GitConfig,
    #[serde(default)]
    fetch: FetchConfig,
    #[serde(default)]
    modules: HashMap<String, String>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct WorkspaceConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct GitConfig {
    protocol: Option<Protocol>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct FetchConfig {
    jobs: Option<usize>,
    retries: Option<u32>,
}

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(false));
        }
        builder
            .add_source(
                Environment::with_prefix("MODWEAVE")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
