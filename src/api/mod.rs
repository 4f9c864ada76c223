use std::error::Error;

use crate::{
    cli::command_handlers::{do_cycles, do_deps, do_get, do_patch, DepsReport},
    cycle::Cycle,
    git::GitWorkspace,
    patch::PatchOutcome,
    resolver::Closure,
};

mod builder;

pub use builder::ModweaveBuilder;

pub struct Modweave {
    workspace: GitWorkspace,
}

impl Modweave {
    pub fn builder() -> ModweaveBuilder {
        ModweaveBuilder::default()
    }

    /// Checks out `module[@treeish][/configuration]` and its whole dependency closure
    pub fn get(&self, request: &str) -> Result<Closure, Box<dyn Error>> {
        do_get(&self.workspace, request)
    }

    /// Finds a dependency cycle reachable from `module[/configuration]`
    pub fn cycles(&self, start: &str) -> Result<Option<Cycle>, Box<dyn Error>> {
        do_cycles(&self.workspace, start)
    }

    /// Makes `configuration` of `module` (its default configuration when `None`) resolve `dep`
    /// and rewrites the module spec
    pub fn patch(
        &self,
        module: &str,
        dep: &str,
        configuration: Option<&str>,
    ) -> Result<PatchOutcome, Box<dyn Error>> {
        do_patch(&self.workspace, module, dep, configuration)
    }

    pub fn deps(
        &self,
        module: &str,
        configuration: Option<&str>,
    ) -> Result<DepsReport, Box<dyn Error>> {
        do_deps(&self.workspace, module, configuration)
    }
}
