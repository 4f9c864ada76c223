//! Editing one dependency of a module's configuration hierarchy.
//!
//! The new dependency is declared once, at the nearest configuration inherited by every
//! configuration that currently declares it along the patched configuration's ancestry. Other
//! configurations below that point keep what they resolved to before: a plain entry preserves an
//! old target, an on/off pair (`-dep`, `dep`) keeps the dependency out.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use thiserror::Error;

use crate::{
    deps::DepSetResolver,
    graph::GraphError,
    model::{
        dep::Dep,
        spec::{DepEntry, ModuleSpec, Section, SectionName},
        ModuleName, StructureError,
    },
};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("Cannot place `{dep}`: {source}")]
    Placement {
        dep: String,
        #[source]
        source: GraphError,
    },
}

/// A configuration whose own section had to be changed to keep its previous resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub configuration: String,
    /// The dependency it keeps resolving to, `None` when it must not see the dependency at all.
    pub keeps: Option<Dep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Unchanged,
    Placed {
        configuration: String,
        overrides: Vec<Override>,
    },
}

pub struct DepPatcher<'a> {
    spec: &'a mut ModuleSpec,
}

impl<'a> DepPatcher<'a> {
    pub fn new(spec: &'a mut ModuleSpec) -> Self {
        DepPatcher { spec }
    }

    /// Makes `configuration` and everything inheriting from it resolve `new_dep`.
    pub fn patch(
        &mut self,
        configuration: &str,
        new_dep: &Dep,
    ) -> Result<PatchOutcome, PatchError> {
        let graph = self.spec.graph().clone();
        if !graph.contains(configuration) {
            return Err(StructureError::UnknownConfiguration {
                module: self.spec.name().clone(),
                configuration: configuration.to_string(),
            }
            .into());
        }
        let name = &new_dep.name;
        let order = graph.topological_order();

        let mut previous: HashMap<&str, Option<Dep>> = HashMap::new();
        for c in &order {
            previous.insert(c.as_str(), self.resolved(c, name)?);
        }

        let reach = graph.reflexive_ancestors(configuration);
        let holders: Vec<String> = reach
            .iter()
            .filter(|c| declares(self.spec.own_section(c), name))
            .cloned()
            .collect();

        let mut subtree = vec![configuration.to_string()];
        subtree.extend(graph.descendants(configuration));
        let up_to_date = subtree
            .iter()
            .all(|c| previous.get(c.as_str()) == Some(&Some(new_dep.clone())));
        if up_to_date && holders.len() <= 1 {
            info!(
                "{}/{} already resolves `{}`",
                self.spec.name(),
                configuration,
                new_dep
            );
            return Ok(PatchOutcome::Unchanged);
        }

        let mut needers = holders.clone();
        if !needers.iter().any(|c| c == configuration) {
            needers.push(configuration.to_string());
        }
        let base = graph
            .nearest_common_base(&needers)
            .map_err(|source| PatchError::Placement {
                dep: new_dep.to_string(),
                source,
            })?;
        debug!(
            "{}: `{}` is needed by {:?}, placing it at {}",
            self.spec.name(),
            name,
            needers,
            base
        );

        let mut position = None;
        for holder in &holders {
            let section = self.section_mut(holder)?;
            let first = section.entries.iter().position(|e| e.name() == name);
            section.entries.retain(|e| e.name() != name);
            if holder == &base {
                position = first;
            }
        }
        let section = self.section_mut(&base)?;
        let position = position.unwrap_or(section.entries.len());
        section.entries.insert(position, DepEntry::Add(new_dep.clone()));

        let mut must_see: HashSet<String> = reach
            .into_iter()
            .filter(|c| c == &base || graph.is_ancestor(&base, c))
            .collect();
        must_see.extend(subtree);

        let mut overrides = Vec::new();
        for c in &order {
            let expected = if must_see.contains(c) {
                Some(new_dep.clone())
            } else {
                previous.get(c.as_str()).cloned().flatten()
            };
            if self.resolved(c, name)? == expected {
                continue;
            }

            self.section_mut(c)?.entries.retain(|e| e.name() != name);
            if self.resolved(c, name)? != expected {
                let section = self.section_mut(c)?;
                match &expected {
                    Some(dep) => section.entries.insert(0, DepEntry::Add(dep.clone())),
                    None => {
                        section.entries.insert(0, DepEntry::Add(new_dep.clone()));
                        section.entries.insert(0, DepEntry::Remove(new_dep.clone()));
                    }
                }
            }
            debug!(
                "{}/{} keeps {:?} for `{}`",
                self.spec.name(),
                c,
                expected,
                name
            );
            overrides.push(Override {
                configuration: c.clone(),
                keeps: expected,
            });
        }

        Ok(PatchOutcome::Placed {
            configuration: base,
            overrides,
        })
    }

    fn resolved(
        &self,
        configuration: &str,
        name: &ModuleName,
    ) -> Result<Option<Dep>, StructureError> {
        Ok(DepSetResolver::new(self.spec)
            .resolve(configuration)?
            .get(name)
            .cloned())
    }

    fn section_mut(&mut self, configuration: &str) -> Result<&mut Section, StructureError> {
        let module = self.spec.name().clone();
        self.spec
            .section_mut(&SectionName::Configuration(configuration.to_string()))
            .ok_or_else(|| StructureError::UnknownConfiguration {
                module,
                configuration: configuration.to_string(),
            })
    }
}

fn declares(section: &Section, name: &ModuleName) -> bool {
    section.entries.iter().any(|e| e.name() == name)
}
