use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use git2::Config;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    flock::FileLock,
    git::{
        repository::{LocalChangesPolicy, ModuleRepository},
        ModuleRef,
    },
    model::{
        coordinate::{ModuleLocation, Protocol},
        spec::{SectionName, SpecDocument},
        value::RawValue,
        ModuleName, ParseError,
    },
    resolver::{BranchLocation, SpecProvider, VersionControl},
};

const LOCK_FILE_NAME: &str = ".modweave.lock";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
    #[error("Workspace lock cannot be acquired")]
    Lock(#[from] crate::flock::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Error while parsing the module spec: {0}")]
    Parsing(#[from] ParseError),
    #[error("Workspace location {location} is not a directory")]
    BadLocation { location: String },
    #[error("Module {module} is neither checked out nor listed in the module registry")]
    UnknownModule { module: ModuleName },
    #[error("{module} has local changes on {current}, refusing to switch to {requested}")]
    LocalChanges {
        module: ModuleName,
        current: String,
        requested: String,
    },
    #[error("{module} has no branch, tag or commit named {treeish}")]
    TreeishNotFound { module: ModuleName, treeish: String },
    #[error("{module} has no default branch")]
    NoDefaultBranch { module: ModuleName },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Cloned,
    Fetched,
}

/// Tuning of parallel fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub jobs: usize,
    pub retries: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            jobs: 4,
            retries: 2,
        }
    }
}

/// Everything a fetch task needs. Shared between blocking tasks.
struct Remotes {
    root: PathBuf,
    registry: HashMap<ModuleName, ModuleLocation>,
    protocol: Protocol,
    /// Modules cloned or fetched during this run; an entry is written once per module.
    fetched: DashMap<ModuleName, FetchState>,
}

impl Remotes {
    fn module_ref(&self, module: &ModuleName) -> ModuleRef {
        ModuleRef::new(module.clone(), &self.root)
    }

    fn url(&self, module: &ModuleName) -> Option<String> {
        self.registry
            .get(module)
            .map(|location| location.to_git_url(self.protocol))
    }

    fn fetch(&self, module: &ModuleName) -> Result<(), WorkspaceError> {
        if self.fetched.contains_key(module) {
            return Ok(());
        }
        let git_config = Config::open_default()?;
        let path = self.module_ref(module).path();
        let url = self.url(module);

        let state = if path.exists() {
            ModuleRepository::open(module, &path)?.fetch(url.as_deref(), &git_config)?;
            FetchState::Fetched
        } else {
            let url = url.ok_or_else(|| WorkspaceError::UnknownModule {
                module: module.clone(),
            })?;
            ModuleRepository::clone_remote(module, &url, &path, &git_config)?;
            FetchState::Cloned
        };
        debug!("{} {:?}", module, state);
        self.fetched.insert(module.clone(), state);
        Ok(())
    }
}

/// A directory holding one working copy per module, `<root>/<module>`.
pub struct GitWorkspace {
    remotes: Arc<Remotes>,
    module_file_name: PathBuf,
    policy: LocalChangesPolicy,
    settings: FetchSettings,
    /// Decoded spec files, dropped whenever the module is checked out again.
    documents: DashMap<ModuleName, SpecDocument>,
    _lock: FileLock,
}

impl GitWorkspace {
    pub fn new(
        root: PathBuf,
        module_file_name: PathBuf,
        registry: HashMap<ModuleName, ModuleLocation>,
        protocol: Protocol,
    ) -> Result<GitWorkspace, WorkspaceError> {
        if root.exists() {
            if !root.is_dir() {
                return Err(WorkspaceError::BadLocation {
                    location: root.to_string_lossy().to_string(),
                });
            }
        } else {
            std::fs::create_dir_all(&root)?;
        }

        let lock = Self::acquire_lock(&root)?;

        Ok(GitWorkspace {
            remotes: Arc::new(Remotes {
                root,
                registry,
                protocol,
                fetched: DashMap::new(),
            }),
            module_file_name,
            policy: LocalChangesPolicy::default(),
            settings: FetchSettings::default(),
            documents: DashMap::new(),
            _lock: lock,
        })
    }

    pub fn with_policy(mut self, policy: LocalChangesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn root(&self) -> &Path {
        &self.remotes.root
    }

    pub fn module_ref(&self, module: &ModuleName) -> ModuleRef {
        self.remotes.module_ref(module)
    }

    pub fn module_path(&self, module: &ModuleName) -> PathBuf {
        self.module_ref(module).path()
    }

    pub fn spec_path(&self, module: &ModuleName) -> PathBuf {
        self.module_path(module).join(&self.module_file_name)
    }

    /// Reads the spec file of a module at its current checkout, bypassing the cache.
    pub fn read_document(&self, module: &ModuleName) -> Result<SpecDocument, WorkspaceError> {
        let path = self.spec_path(module);
        if path.exists() {
            Ok(SpecDocument::from_file(&path)?)
        } else if self.module_path(module).exists() {
            debug!(
                "{} has no {}, assuming a single full-build configuration",
                module,
                self.module_file_name.display()
            );
            Ok(SpecDocument::implicit())
        } else {
            Err(WorkspaceError::UnknownModule {
                module: module.clone(),
            })
        }
    }

    pub fn write_document(
        &self,
        module: &ModuleName,
        document: &SpecDocument,
    ) -> Result<(), WorkspaceError> {
        let path = self.spec_path(module);
        document.write(&path)?;
        self.documents.remove(module);
        info!("Wrote {}", path.display());
        Ok(())
    }

    fn document(&self, module: &ModuleName) -> Result<SpecDocument, WorkspaceError> {
        if let Some(document) = self.documents.get(module) {
            return Ok(document.clone());
        }
        let document = self.read_document(module)?;
        self.documents.insert(module.clone(), document.clone());
        Ok(document)
    }

    fn repository(&self, module: &ModuleName) -> Result<ModuleRepository, WorkspaceError> {
        let path = self.module_path(module);
        if !path.exists() {
            return Err(WorkspaceError::UnknownModule {
                module: module.clone(),
            });
        }
        ModuleRepository::open(module, &path)
    }

    fn acquire_lock(root: &Path) -> Result<FileLock, WorkspaceError> {
        let location = root.join(LOCK_FILE_NAME);
        debug!("Acquiring a lock on the workspace: {}", location.display());
        let lock = FileLock::new(&location)?;
        debug!("Acquired a lock on the workspace");
        Ok(lock)
    }
}

impl SpecProvider for GitWorkspace {
    fn configurations(&self, module: &ModuleName) -> anyhow::Result<Vec<String>> {
        Ok(self.document(module)?.configuration_lines())
    }

    fn deps_section(
        &self,
        module: &ModuleName,
        section: &SectionName,
    ) -> anyhow::Result<Option<RawValue>> {
        Ok(self.document(module)?.deps_section(section))
    }

    fn install_section(
        &self,
        module: &ModuleName,
        section: &SectionName,
    ) -> anyhow::Result<Option<RawValue>> {
        Ok(self.document(module)?.install_section(section))
    }
}

impl VersionControl for GitWorkspace {
    fn branch_exists(
        &self,
        module: &ModuleName,
        branch: &str,
        location: BranchLocation,
    ) -> anyhow::Result<bool> {
        let repository = self.repository(module)?;
        Ok(repository.branch_exists(branch, location == BranchLocation::Remote))
    }

    fn current_branch(&self, module: &ModuleName) -> anyhow::Result<String> {
        Ok(self.repository(module)?.current_branch()?)
    }

    fn default_branch(&self, module: &ModuleName) -> anyhow::Result<String> {
        Ok(self.repository(module)?.default_branch()?)
    }

    fn checkout(&self, module: &ModuleName, treeish: &str) -> anyhow::Result<String> {
        let actual = self.repository(module)?.checkout(treeish, self.policy)?;
        self.documents.remove(module);
        Ok(actual)
    }

    fn has_local_changes(&self, module: &ModuleName) -> anyhow::Result<bool> {
        Ok(self.repository(module)?.has_local_changes()?)
    }

    fn fetch(&self, module: &ModuleName) -> anyhow::Result<()> {
        self.prefetch(std::slice::from_ref(module))
    }

    fn prefetch(&self, modules: &[ModuleName]) -> anyhow::Result<()> {
        let pending: Vec<ModuleName> = modules
            .iter()
            .filter(|module| !self.remotes.fetched.contains_key(*module))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!("Fetching {} module(s)", pending.len());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()?;
        let settings = self.settings;
        runtime.block_on(async {
            let permits = Arc::new(Semaphore::new(settings.jobs.max(1)));
            let mut tasks = JoinSet::new();
            for module in pending {
                let remotes = Arc::clone(&self.remotes);
                let permits = Arc::clone(&permits);
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await?;
                    fetch_with_retries(remotes, module, settings.retries).await
                });
            }
            while let Some(result) = tasks.join_next().await {
                result??;
            }
            Ok(())
        })
    }
}

async fn fetch_with_retries(
    remotes: Arc<Remotes>,
    module: ModuleName,
    retries: u32,
) -> anyhow::Result<()> {
    let mut attempt = 0;
    loop {
        let task_remotes = Arc::clone(&remotes);
        let task_module = module.clone();
        let result =
            tokio::task::spawn_blocking(move || task_remotes.fetch(&task_module)).await?;
        match result {
            Ok(()) => return Ok(()),
            // Nothing to retry when the module is not known at all.
            Err(error @ WorkspaceError::UnknownModule { .. }) => return Err(error.into()),
            Err(error) if attempt < retries => {
                attempt += 1;
                warn!(
                    "Failed to fetch {} ({}), retrying ({}/{})",
                    module, error, attempt, retries
                );
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
            Err(error) => return Err(error.into()),
        }
    }
}
