use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    cycle::{Cycle, CycleDetector},
    model::dep::Dep,
    resolver::{Closure, ClosureResolver, ResolveError, SpecProvider, VersionControl},
};

#[derive(Error, Debug)]
pub enum GetError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Dependency cycle: {0}")]
    Cycle(Cycle),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// Brings `request.name` and everything it needs into the workspace.
///
/// The root is fetched and, when the request names a treeish, checked out first. Every other
/// module is checked out by the closure resolver. Modules with uncommitted changes are reported
/// but do not fail the run.
pub fn get<W>(workspace: &W, request: &Dep) -> Result<Closure, GetError>
where
    W: SpecProvider + VersionControl + ?Sized,
{
    let root = &request.name;
    workspace.fetch(root)?;
    if let Some(treeish) = &request.treeish {
        info!("Checking out {} at {}", root, treeish);
        workspace.checkout(root, treeish)?;
    }
    let current_branch = workspace.current_branch(root)?;
    debug!("{} is on {}", root, current_branch);

    let closure = ClosureResolver::new(workspace, workspace).resolve(
        root,
        request.configuration.as_deref(),
        &current_branch,
    )?;

    if let Some(cycle) = CycleDetector::new(workspace)
        .find_cycle(root, request.configuration.as_deref())?
    {
        return Err(GetError::Cycle(cycle));
    }

    for (module, _) in closure.iter() {
        if workspace.has_local_changes(module)? {
            warn!("{} has local changes", module);
        }
    }
    info!("Resolved {} module(s) for {}", closure.len(), closure.root());
    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::{model::ModuleName, testing::InMemoryWorkspace};

    fn pinned(closure: &Closure) -> Vec<String> {
        closure
            .iter()
            .map(|(name, module)| format!("{}@{}/{}", name, module.treeish, module.configuration))
            .collect()
    }

    #[test]
    fn checks_out_the_requested_root_treeish() {
        let workspace = InMemoryWorkspace::default()
            .with_module("app", r#"["full-build"]"#)
            .with_treeish(
                "app",
                "release",
                r#"["full-build"]
                deps = ["core@v2"]"#,
            )
            .with_module("core", r#"["full-build"]"#)
            .with_treeish("core", "v2", r#"["full-build"]"#);

        let closure = get(&workspace, &Dep::parse("app@release").unwrap()).unwrap();
        assert_eq!(closure.root(), &ModuleName::from("app"));

        assert_eq!(
            pinned(&closure),
            vec!["app@release/full-build", "core@v2/full-build"]
        );
        assert_eq!(
            workspace.checkouts(),
            vec![
                ("app".to_string(), "release".to_string()),
                ("core".to_string(), "v2".to_string())
            ]
        );
        assert_eq!(workspace.prefetched()[0], ModuleName::from("app"));
    }

    #[test]
    fn local_changes_do_not_fail_the_run() {
        let workspace = InMemoryWorkspace::default()
            .with_module(
                "app",
                r#"["full-build"]
                deps = ["core"]"#,
            )
            .with_module("core", r#"["full-build"]"#)
            .with_local_changes("core");

        let closure = get(&workspace, &Dep::new("app")).unwrap();
        assert_eq!(closure.len(), 2);
    }

    #[test]
    fn cycle_fails_the_run() {
        let workspace = InMemoryWorkspace::default()
            .with_module(
                "app",
                r#"["full-build"]
                deps = ["core"]"#,
            )
            .with_module(
                "core",
                r#"["full-build"]
                deps = ["app"]"#,
            );

        match get(&workspace, &Dep::new("app")) {
            Err(GetError::Cycle(cycle)) => assert_eq!(
                cycle.to_string(),
                "app/full-build -> core/full-build -> app/full-build"
            ),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }
}
