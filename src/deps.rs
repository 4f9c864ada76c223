//! Effective dependency list of one configuration.
//!
//! A configuration's deps are its own section, then the sections of its ancestors breadth-first,
//! then the module's `default` section. A section only contributes entries whose name is not
//! already present in what came before it, so more specific sections shadow inherited ones.
//! Afterwards each `-X` must be directly followed by a matching `X` and the pair is dropped.

use std::collections::HashSet;

use log::trace;

use crate::model::{
    dep::Dep,
    spec::{DepEntry, ModuleSpec, Section, SectionName},
    ModuleName, StructureError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepsSection {
    /// Preferred treeish candidates for deps without an explicit treeish.
    pub force: Option<Vec<String>>,
    pub deps: Vec<Dep>,
}

impl DepsSection {
    pub fn get(&self, name: &ModuleName) -> Option<&Dep> {
        self.deps.iter().find(|dep| &dep.name == name)
    }
}

pub struct DepSetResolver<'a> {
    spec: &'a ModuleSpec,
}

impl<'a> DepSetResolver<'a> {
    pub fn new(spec: &'a ModuleSpec) -> Self {
        DepSetResolver { spec }
    }

    pub fn resolve(&self, configuration: &str) -> Result<DepsSection, StructureError> {
        let mut force: Option<Vec<String>> = None;
        let mut merged: Vec<(SectionName, DepEntry)> = Vec::new();

        for (name, section) in self.sections(configuration)? {
            if force.is_none() {
                force.clone_from(&section.force);
            }
            let before: HashSet<&ModuleName> = merged.iter().map(|(_, e)| e.name()).collect();
            let fresh: Vec<(SectionName, DepEntry)> = section
                .entries
                .iter()
                .filter(|entry| !before.contains(entry.name()))
                .map(|entry| (name.clone(), entry.clone()))
                .collect();
            merged.extend(fresh);
        }

        let deps = self.relax(configuration, merged)?;
        trace!(
            "{}/{} resolves to [{}]",
            self.spec.name(),
            configuration,
            deps.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(DepsSection { force, deps })
    }

    /// Install artifacts of a configuration: the same section order as [`Self::resolve`], exact
    /// duplicates dropped.
    pub fn resolve_install(&self, configuration: &str) -> Result<Vec<String>, StructureError> {
        let mut result: Vec<String> = Vec::new();
        for (name, _) in self.sections(configuration)? {
            for artifact in self.spec.install(&name) {
                if !result.contains(artifact) {
                    result.push(artifact.clone());
                }
            }
        }
        Ok(result)
    }

    fn sections(
        &self,
        configuration: &str,
    ) -> Result<Vec<(SectionName, &'a Section)>, StructureError> {
        let graph = self.spec.graph();
        if !graph.contains(configuration) {
            return Err(StructureError::UnknownConfiguration {
                module: self.spec.name().clone(),
                configuration: configuration.to_string(),
            });
        }
        let mut sections: Vec<(SectionName, &'a Section)> = graph
            .reflexive_ancestors(configuration)
            .into_iter()
            .map(|c| {
                let section = self.spec.own_section(&c);
                (SectionName::Configuration(c), section)
            })
            .collect();
        sections.push((SectionName::Default, self.spec.default_section()));
        Ok(sections)
    }

    fn relax(
        &self,
        configuration: &str,
        merged: Vec<(SectionName, DepEntry)>,
    ) -> Result<Vec<Dep>, StructureError> {
        let mut kept: Vec<(SectionName, Dep)> = Vec::new();
        let mut entries = merged.into_iter().peekable();
        while let Some((section, entry)) = entries.next() {
            match entry {
                DepEntry::Add(dep) => kept.push((section, dep)),
                DepEntry::Remove(pattern) => match entries.peek() {
                    Some((_, DepEntry::Add(next))) if pattern.matches(next) => {
                        entries.next();
                    }
                    _ => {
                        return Err(StructureError::DeletedButNotAdded {
                            module: self.spec.name().clone(),
                            configuration: section.to_string(),
                            dep: pattern.to_string(),
                        })
                    }
                },
            }
        }

        for (i, (section, dep)) in kept.iter().enumerate() {
            if let Some((first_section, first)) =
                kept[..i].iter().find(|(_, other)| other.name == dep.name)
            {
                return Err(StructureError::DuplicateDependency {
                    module: self.spec.name().clone(),
                    configuration: configuration.to_string(),
                    name: dep.name.clone(),
                    first: format!("{first} in [{first_section}]"),
                    second: format!("{dep} in [{section}]"),
                });
            }
        }

        Ok(kept.into_iter().map(|(_, dep)| dep).collect())
    }
}
