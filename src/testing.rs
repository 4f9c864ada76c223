//! In-memory workspace standing in for git checkouts in tests.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use anyhow::{anyhow, bail};

use crate::{
    model::{
        spec::{ModuleSpec, SectionName, SpecDocument},
        value::RawValue,
        ModuleName,
    },
    resolver::{BranchLocation, SpecProvider, VersionControl},
};

pub const MASTER: &str = "master";

/// Loads the spec of a single module from a TOML string.
pub fn spec(module: &str, toml: &str) -> ModuleSpec {
    let workspace = InMemoryWorkspace::default().with_module(module, toml);
    ModuleSpec::load(&workspace, &ModuleName::from(module)).unwrap()
}

#[derive(Default)]
pub struct InMemoryWorkspace {
    modules: HashMap<ModuleName, FakeModule>,
    checkouts: RefCell<Vec<(String, String)>>,
    prefetched: RefCell<Vec<ModuleName>>,
}

struct FakeModule {
    current: RefCell<String>,
    trees: HashMap<String, SpecDocument>,
    local_only: HashSet<String>,
    dirty: bool,
}

impl InMemoryWorkspace {
    pub fn with_module(self, name: &str, toml: &str) -> Self {
        self.with_treeish(name, MASTER, toml)
    }

    /// Adds or replaces the spec of `name` at a remote branch, tag or commit.
    pub fn with_treeish(mut self, name: &str, treeish: &str, toml: &str) -> Self {
        let document = SpecDocument::from_toml_str(toml).unwrap();
        self.modules
            .entry(ModuleName::from(name))
            .or_insert_with(|| FakeModule {
                current: RefCell::new(MASTER.to_string()),
                trees: HashMap::new(),
                local_only: HashSet::new(),
                dirty: false,
            })
            .trees
            .insert(treeish.to_string(), document);
        self
    }

    pub fn with_local_branch(mut self, name: &str, branch: &str, toml: &str) -> Self {
        self = self.with_treeish(name, branch, toml);
        if let Some(module) = self.modules.get_mut(&ModuleName::from(name)) {
            module.local_only.insert(branch.to_string());
        }
        self
    }

    pub fn with_local_changes(mut self, name: &str) -> Self {
        if let Some(module) = self.modules.get_mut(&ModuleName::from(name)) {
            module.dirty = true;
        }
        self
    }

    pub fn checkouts(&self) -> Vec<(String, String)> {
        self.checkouts.borrow().clone()
    }

    pub fn prefetched(&self) -> Vec<ModuleName> {
        self.prefetched.borrow().clone()
    }

    fn module(&self, name: &ModuleName) -> anyhow::Result<&FakeModule> {
        self.modules
            .get(name)
            .ok_or_else(|| anyhow!("unknown module {name}"))
    }

    fn document(&self, name: &ModuleName) -> anyhow::Result<&SpecDocument> {
        let module = self.module(name)?;
        let current = module.current.borrow();
        module
            .trees
            .get(current.as_str())
            .ok_or_else(|| anyhow!("{name} has no spec at {current}"))
    }
}

impl SpecProvider for InMemoryWorkspace {
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

impl VersionControl for InMemoryWorkspace {
    fn branch_exists(
        &self,
        module: &ModuleName,
        branch: &str,
        location: BranchLocation,
    ) -> anyhow::Result<bool> {
        let module = self.module(module)?;
        Ok(match location {
            BranchLocation::Local => {
                module.local_only.contains(branch) || *module.current.borrow() == branch
            }
            BranchLocation::Remote => {
                module.trees.contains_key(branch) && !module.local_only.contains(branch)
            }
        })
    }

    fn current_branch(&self, module: &ModuleName) -> anyhow::Result<String> {
        Ok(self.module(module)?.current.borrow().clone())
    }

    fn default_branch(&self, module: &ModuleName) -> anyhow::Result<String> {
        self.module(module)?;
        Ok(MASTER.to_string())
    }

    fn checkout(&self, module: &ModuleName, treeish: &str) -> anyhow::Result<String> {
        let fake = self.module(module)?;
        if !fake.trees.contains_key(treeish) {
            bail!("{module} has no treeish {treeish}");
        }
        self.checkouts
            .borrow_mut()
            .push((module.to_string(), treeish.to_string()));
        if fake.dirty {
            return Ok(fake.current.borrow().clone());
        }
        fake.current.replace(treeish.to_string());
        Ok(treeish.to_string())
    }

    fn has_local_changes(&self, module: &ModuleName) -> anyhow::Result<bool> {
        Ok(self.module(module)?.dirty)
    }

    fn fetch(&self, module: &ModuleName) -> anyhow::Result<()> {
        self.module(module)?;
        self.prefetched.borrow_mut().push(module.clone());
        Ok(())
    }
}
