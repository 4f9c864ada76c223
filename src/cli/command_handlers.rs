use std::error::Error;

use log::{debug, info};

use crate::{
    cycle::{Cycle, CycleDetector},
    deps::{DepSetResolver, DepsSection},
    get,
    git::GitWorkspace,
    model::{dep::Dep, spec::ModuleSpec, ModuleName},
    patch::{DepPatcher, PatchOutcome},
    resolver::Closure,
};

/// Resolved view of one configuration, as printed by the `deps` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepsReport {
    pub module: ModuleName,
    pub configuration: String,
    pub section: DepsSection,
    pub install: Vec<String>,
}

/// Handler to get command
/// `request` is `module[@treeish][/configuration]`
pub fn do_get(workspace: &GitWorkspace, request: &str) -> Result<Closure, Box<dyn Error>> {
    let request = Dep::parse(request)?;
    info!("Getting {} into {}", request, workspace.root().display());
    let closure = get::get(workspace, &request)?;
    for (name, module) in closure.iter() {
        debug!(
            "{} pinned at {} ({})",
            workspace.module_ref(name),
            module.treeish,
            module.configuration
        );
    }
    Ok(closure)
}

/// Handler to cycles command
/// `start` is `module[/configuration]`, read at the module's current checkout
pub fn do_cycles(
    workspace: &GitWorkspace,
    start: &str,
) -> Result<Option<Cycle>, Box<dyn Error>> {
    let start = Dep::parse(start)?;
    let cycle =
        CycleDetector::new(workspace).find_cycle(&start.name, start.configuration.as_deref())?;
    match &cycle {
        Some(cycle) => info!("Found a dependency cycle: {}", cycle),
        None => info!("No dependency cycle reachable from {}", start.name),
    }
    Ok(cycle)
}

/// Handler to patch command
/// Rewrites the module spec only when the patch changed something
pub fn do_patch(
    workspace: &GitWorkspace,
    module: &str,
    dep_line: &str,
    configuration: Option<&str>,
) -> Result<PatchOutcome, Box<dyn Error>> {
    let module = ModuleName::from(module);
    let new_dep = Dep::parse(dep_line)?;
    let mut spec = ModuleSpec::load(workspace, &module)?;
    let configuration = target_configuration(&spec, configuration)?;

    let outcome = DepPatcher::new(&mut spec).patch(&configuration, &new_dep)?;
    if let PatchOutcome::Placed {
        configuration: placed,
        overrides,
    } = &outcome
    {
        let mut document = workspace.read_document(&module)?;
        document.update_deps(&spec);
        workspace.write_document(&module, &document)?;
        info!("Placed `{}` in {}/{}", new_dep, module, placed);
        for keep in overrides {
            match &keep.keeps {
                Some(dep) => info!("{}/{} keeps `{}`", module, keep.configuration, dep),
                None => info!(
                    "{}/{} keeps `{}` out",
                    module, keep.configuration, new_dep.name
                ),
            }
        }
    }
    Ok(outcome)
}

/// Handler to deps command
pub fn do_deps(
    workspace: &GitWorkspace,
    module: &str,
    configuration: Option<&str>,
) -> Result<DepsReport, Box<dyn Error>> {
    let module = ModuleName::from(module);
    let spec = ModuleSpec::load(workspace, &module)?;
    let configuration = target_configuration(&spec, configuration)?;
    let resolver = DepSetResolver::new(&spec);
    Ok(DepsReport {
        section: resolver.resolve(&configuration)?,
        install: resolver.resolve_install(&configuration)?,
        module,
        configuration,
    })
}

fn target_configuration(
    spec: &ModuleSpec,
    configuration: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    match configuration {
        Some(configuration) => Ok(configuration.to_string()),
        None => Ok(spec.graph().default_configuration()?.to_string()),
    }
}
