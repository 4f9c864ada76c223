use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    cert::Cert,
    AutotagOption, BranchType, CertificateCheckStatus, Config, Cred, CredentialType, FetchOptions,
    Oid, RemoteCallbacks, Repository, StatusOptions,
};
use log::{debug, info, trace, warn};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};

use crate::{git::workspace::WorkspaceError, model::ModuleName};

const ORIGIN: &str = "origin";
const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";

/// What to do when switching a module that has uncommitted changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LocalChangesPolicy {
    /// Refuse to switch.
    #[default]
    Fail,
    /// Throw the changes away.
    Reset,
    /// Switch keeping the changes when they do not conflict, then fast-forward to `origin`.
    Pull,
    /// Leave the module where it is.
    ForceLocal,
}

/// The working copy of one module.
pub struct ModuleRepository {
    name: ModuleName,
    repo: Repository,
}

impl ModuleRepository {
    pub fn open(name: &ModuleName, path: &Path) -> Result<ModuleRepository, WorkspaceError> {
        trace!("Opening existing repository at {}", path.display());
        Ok(ModuleRepository {
            name: name.clone(),
            repo: Repository::open(path)?,
        })
    }

    pub fn clone_remote(
        name: &ModuleName,
        url: &str,
        path: &Path,
        git_config: &Config,
    ) -> Result<ModuleRepository, WorkspaceError> {
        info!("Cloning {} from {}", name, url);
        let repo = RepoBuilder::new()
            .fetch_options(fetch_options(git_config))
            .clone(url, path)?;
        Ok(ModuleRepository {
            name: name.clone(),
            repo,
        })
    }

    pub fn fetch(&self, url: Option<&str>, git_config: &Config) -> Result<(), WorkspaceError> {
        if let Some(url) = url {
            let remote = self.repo.find_remote(ORIGIN)?;
            if remote.url() != Some(url) {
                // The configured protocol changed since the module was cloned.
                trace!(
                    "Updating remote existing url {:?} to new url {}",
                    remote.url(),
                    url
                );
                self.repo.remote_set_url(ORIGIN, url)?;
            }
        }

        let mut remote = self.repo.find_remote(ORIGIN)?;
        let refspecs: Vec<String> = remote
            .refspecs()
            .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
            .collect();
        debug!("Fetching {}", self.name);
        remote.fetch(&refspecs, Some(&mut fetch_options(git_config)), None)?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str, remote: bool) -> bool {
        if remote {
            self.repo
                .find_branch(&format!("{ORIGIN}/{branch}"), BranchType::Remote)
                .is_ok()
        } else {
            self.repo.find_branch(branch, BranchType::Local).is_ok()
        }
    }

    /// Branch name, or the commit hash for a detached head.
    pub fn current_branch(&self) -> Result<String, WorkspaceError> {
        let head = self.repo.head()?;
        match head.shorthand() {
            Some(name) if head.is_branch() => Ok(name.to_string()),
            _ => Ok(head.peel_to_commit()?.id().to_string()),
        }
    }

    pub fn default_branch(&self) -> Result<String, WorkspaceError> {
        let prefix = format!("refs/remotes/{ORIGIN}/");
        if let Ok(reference) = self.repo.find_reference(&format!("{prefix}HEAD")) {
            if let Some(branch) = reference
                .symbolic_target()
                .and_then(|target| target.strip_prefix(&prefix))
            {
                return Ok(branch.to_string());
            }
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate, true) || self.branch_exists(candidate, false) {
                return Ok(candidate.to_string());
            }
        }
        Err(WorkspaceError::NoDefaultBranch {
            module: self.name.clone(),
        })
    }

    pub fn has_local_changes(&self) -> Result<bool, WorkspaceError> {
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        Ok(!self.repo.statuses(Some(&mut options))?.is_empty())
    }

    /// Switches to `treeish` and returns what is checked out afterwards. That is `treeish`, except
    /// under [`LocalChangesPolicy::ForceLocal`] where a dirty module stays where it is.
    pub fn checkout(
        &self,
        treeish: &str,
        policy: LocalChangesPolicy,
    ) -> Result<String, WorkspaceError> {
        let current = self.current_branch()?;
        if current == treeish {
            if policy == LocalChangesPolicy::Pull {
                self.fast_forward()?;
            }
            return Ok(current);
        }

        let mut builder = CheckoutBuilder::new();
        if self.has_local_changes()? {
            match policy {
                LocalChangesPolicy::Fail => {
                    return Err(WorkspaceError::LocalChanges {
                        module: self.name.clone(),
                        current,
                        requested: treeish.to_string(),
                    })
                }
                LocalChangesPolicy::ForceLocal => {
                    warn!(
                        "{} has local changes, leaving it on {} instead of {}",
                        self.name, current, treeish
                    );
                    return Ok(current);
                }
                LocalChangesPolicy::Reset => {
                    warn!("Discarding local changes of {}", self.name);
                    builder.force();
                }
                LocalChangesPolicy::Pull => {
                    builder.safe();
                }
            }
        } else {
            builder.safe();
        }

        info!("Checking out {} at {}", self.name, treeish);
        if self.branch_exists(treeish, false) {
            self.switch_branch(treeish, &mut builder)?;
            if policy == LocalChangesPolicy::Pull {
                self.fast_forward()?;
            }
        } else if self.branch_exists(treeish, true) {
            let upstream = format!("{ORIGIN}/{treeish}");
            let commit = self
                .repo
                .find_branch(&upstream, BranchType::Remote)?
                .get()
                .peel_to_commit()?;
            let mut branch = self.repo.branch(treeish, &commit, false)?;
            branch.set_upstream(Some(&upstream))?;
            self.switch_branch(treeish, &mut builder)?;
        } else {
            let commit = self
                .repo
                .revparse_single(treeish)
                .and_then(|object| object.peel_to_commit())
                .map_err(|_| WorkspaceError::TreeishNotFound {
                    module: self.name.clone(),
                    treeish: treeish.to_string(),
                })?;
            self.repo
                .checkout_tree(commit.as_object(), Some(&mut builder))?;
            self.repo.set_head_detached(commit.id())?;
        }
        Ok(treeish.to_string())
    }

    fn switch_branch(
        &self,
        branch: &str,
        builder: &mut CheckoutBuilder,
    ) -> Result<(), WorkspaceError> {
        let refname = format!("refs/heads/{branch}");
        let target = self.repo.revparse_single(&refname)?;
        self.repo.checkout_tree(&target, Some(builder))?;
        self.repo.set_head(&refname)?;
        Ok(())
    }

    /// Moves the current branch to its upstream when that is a fast-forward.
    fn fast_forward(&self) -> Result<(), WorkspaceError> {
        let head = self.repo.head()?;
        let Some(name) = head.shorthand().filter(|_| head.is_branch()) else {
            return Ok(());
        };
        let Ok(upstream) = self
            .repo
            .find_branch(name, BranchType::Local)
            .and_then(|branch| branch.upstream())
        else {
            return Ok(());
        };

        let local: Oid = head.peel_to_commit()?.id();
        let target = upstream.get().peel_to_commit()?;
        if target.id() == local {
            return Ok(());
        }
        if !self.repo.graph_descendant_of(target.id(), local)? {
            warn!(
                "{} has diverged from its upstream, not fast-forwarding {}",
                self.name, name
            );
            return Ok(());
        }

        debug!("Fast-forwarding {} of {} to {}", name, self.name, target.id());
        self.repo
            .checkout_tree(target.as_object(), Some(CheckoutBuilder::new().safe()))?;
        self.repo
            .find_reference(&format!("refs/heads/{name}"))?
            .set_target(target.id(), "modweave: fast-forward")?;
        Ok(())
    }
}

fn fetch_options(git_config: &Config) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed_types| {
        trace!(
            "Requested credentials for {}, username {:?}, allowed types {:?}",
            url,
            username,
            allowed_types
        );
        // Asking for ssh username
        if allowed_types.contains(CredentialType::USERNAME) {
            return Cred::username("git");
        }
        // SSH auth
        if allowed_types.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        // HTTP auth
        if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
            return Cred::credential_helper(git_config, url, username);
        }
        Err(git2::Error::from_str("no valid authentication available"))
    });
    callbacks.certificate_check(check_certificate);

    let mut fetch_options = FetchOptions::new();
    fetch_options
        .remote_callbacks(callbacks)
        .download_tags(AutotagOption::All);
    fetch_options
}

fn check_certificate(
    certificate: &Cert<'_>,
    host: &str,
) -> Result<CertificateCheckStatus, git2::Error> {
    if let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) {
        trace!("Loading {}", GLOBAL_KNOWN_HOSTS);
        match KnownHosts::read_file(GLOBAL_KNOWN_HOSTS) {
            Ok(entries) => {
                for entry in entries {
                    if host_matches_patterns(host, entry.host_patterns())
                        && entry.public_key().to_bytes().as_deref() == Ok(hostkey)
                    {
                        trace!("Known host entry for {} matches the host key", host);
                        return Ok(CertificateCheckStatus::CertificateOk);
                    }
                }
                trace!("No known host entry matched the host key");
            }
            Err(error) => trace!("Could not load {}: {}", GLOBAL_KNOWN_HOSTS, error),
        }
    }
    Ok(CertificateCheckStatus::CertificatePassthrough)
}

fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let mut match_found = false;
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                if let Some(pattern) = pattern.strip_prefix('!') {
                    if pattern == host {
                        return false;
                    }
                } else {
                    match_found |= pattern == host;
                }
            }
            match_found
        }
        HostPatterns::HashedName { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{fs, path::PathBuf};

    use pretty_assertions::assert_eq;

    /// A repository with one commit on `master` and a `release` branch one commit ahead.
    fn upstream(dir: &Path) -> PathBuf {
        let path = dir.join("upstream");
        let repo = Repository::init(&path).unwrap();
        repo.set_head("refs/heads/master").unwrap();
        commit(&repo, "module.toml", "[\"full-build\"]\n", "initial");
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("release", &head, false).unwrap();
        repo.set_head("refs/heads/release").unwrap();
        commit(&repo, "module.toml", "[\"full-build\"]\ndeps = [\"core\"]\n", "release");
        repo.set_head("refs/heads/master").unwrap();
        repo.checkout_head(Some(CheckoutBuilder::new().force())).unwrap();
        path
    }

    fn commit(repo: &Repository, file: &str, contents: &str, message: &str) {
        let workdir = repo.workdir().unwrap().to_path_buf();
        fs::write(workdir.join(file), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = git2::Signature::now("modweave", "modweave@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .unwrap();
    }

    fn cloned(dir: &Path) -> ModuleRepository {
        let url = upstream(dir);
        let config = Config::new().unwrap();
        ModuleRepository::clone_remote(
            &"core".into(),
            url.to_str().unwrap(),
            &dir.join("core"),
            &config,
        )
        .unwrap()
    }

    #[test]
    fn clone_and_inspect_branches() {
        let dir = tempfile::tempdir().unwrap();
        let module = cloned(dir.path());

        assert_eq!(module.current_branch().unwrap(), "master");
        assert_eq!(module.default_branch().unwrap(), "master");
        assert!(module.branch_exists("release", true));
        assert!(!module.branch_exists("release", false));
        assert!(!module.has_local_changes().unwrap());
    }

    #[test]
    fn checkout_remote_branch_creates_tracking_branch() {
        let dir = tempfile::tempdir().unwrap();
        let module = cloned(dir.path());

        assert_eq!(
            module.checkout("release", LocalChangesPolicy::Fail).unwrap(),
            "release"
        );
        assert_eq!(module.current_branch().unwrap(), "release");
        assert!(module.branch_exists("release", false));
        let spec = fs::read_to_string(dir.path().join("core/module.toml")).unwrap();
        assert!(spec.contains("deps"));
    }

    #[test]
    fn local_changes_policies() {
        let dir = tempfile::tempdir().unwrap();
        let module = cloned(dir.path());
        let spec_path = dir.path().join("core/module.toml");
        fs::write(&spec_path, "[\"client\"]\n").unwrap();
        assert!(module.has_local_changes().unwrap());

        assert!(matches!(
            module.checkout("release", LocalChangesPolicy::Fail),
            Err(WorkspaceError::LocalChanges { .. })
        ));

        assert_eq!(
            module
                .checkout("release", LocalChangesPolicy::ForceLocal)
                .unwrap(),
            "master"
        );
        assert_eq!(module.current_branch().unwrap(), "master");

        assert_eq!(
            module.checkout("release", LocalChangesPolicy::Reset).unwrap(),
            "release"
        );
        assert_eq!(module.current_branch().unwrap(), "release");
        assert!(!module.has_local_changes().unwrap());
    }

    #[test]
    fn unknown_treeish() {
        let dir = tempfile::tempdir().unwrap();
        let module = cloned(dir.path());
        assert!(matches!(
            module.checkout("no-such-branch", LocalChangesPolicy::Fail),
            Err(WorkspaceError::TreeishNotFound { .. })
        ));
    }
}
