//! Per-module configuration inheritance graph.
//!
//! Edges point from a configuration to the parents it declares with `>`. A configuration
//! inherits every dependency of its ancestors, so `full-build > client` means `full-build`
//! covers everything `client` needs.

use std::collections::{HashMap, HashSet, VecDeque};

use log::warn;
use thiserror::Error;

use crate::model::{
    configuration::{ConfigNode, FULL_BUILD},
    ModuleName, StructureError,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("{module}: configurations `{first}` and `{second}` have no common configuration covering both")]
    NoCommonAncestor {
        module: ModuleName,
        first: String,
        second: String,
    },
    #[error("{module}: configurations {configurations:?} do not inherit from a common configuration")]
    NoCommonBase {
        module: ModuleName,
        configurations: Vec<String>,
    },
    #[error("{module}: configuration `{configuration}` does not exist")]
    UnknownConfiguration {
        module: ModuleName,
        configuration: String,
    },
}

/// Outcome of looking a requested configuration up in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLookup {
    Found(String),
    /// The requested configuration is missing but the module has `full-build`.
    FellBackTo(String),
    Missing,
}

#[derive(Debug, Clone)]
pub struct ConfigGraph {
    module: ModuleName,
    nodes: Vec<ConfigNode>,
    index: HashMap<String, usize>,
}

impl ConfigGraph {
    pub fn build(
        module: ModuleName,
        nodes: Vec<ConfigNode>,
    ) -> Result<ConfigGraph, StructureError> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(StructureError::DuplicateConfiguration {
                    module,
                    configuration: node.name.clone(),
                });
            }
        }

        let graph = ConfigGraph {
            module,
            nodes,
            index,
        };

        for node in &graph.nodes {
            for parent in &node.parent_names {
                if !graph.contains(parent) {
                    warn!(
                        "{}: configuration `{}` inherits from undeclared `{}`, ignoring it",
                        graph.module, node.name, parent
                    );
                }
            }
            if let Some(through) = graph.find_path_back(&node.name) {
                return Err(StructureError::CyclicConfiguration {
                    module: graph.module.clone(),
                    configuration: node.name.clone(),
                    through,
                });
            }
        }

        Ok(graph)
    }

    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    pub fn nodes(&self) -> &[ConfigNode] {
        &self.nodes
    }

    pub fn contains(&self, configuration: &str) -> bool {
        self.index.contains_key(configuration)
    }

    pub fn node(&self, configuration: &str) -> Option<&ConfigNode> {
        self.index.get(configuration).map(|&i| &self.nodes[i])
    }

    /// Declared parents, or `None` for a root configuration.
    pub fn immediate_parents(&self, configuration: &str) -> Option<&[String]> {
        self.node(configuration)
            .map(|node| node.parent_names.as_slice())
            .filter(|parents| !parents.is_empty())
    }

    /// Breadth-first expansion of the parents, each level in declaration order, first
    /// discovery wins. `None` for a root configuration.
    pub fn all_ancestors(&self, configuration: &str) -> Option<Vec<String>> {
        let mut result: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([configuration]);
        let mut queue: VecDeque<&str> = VecDeque::from([configuration]);
        while let Some(current) = queue.pop_front() {
            for parent in self.immediate_parents(current).unwrap_or_default() {
                if self.contains(parent) && seen.insert(parent.as_str()) {
                    result.push(parent.clone());
                    queue.push_back(parent.as_str());
                }
            }
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// The configuration itself followed by [`Self::all_ancestors`].
    pub fn reflexive_ancestors(&self, configuration: &str) -> Vec<String> {
        let mut result = vec![configuration.to_string()];
        result.extend(self.all_ancestors(configuration).unwrap_or_default());
        result
    }

    pub fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        self.all_ancestors(of)
            .is_some_and(|ancestors| ancestors.iter().any(|a| a == ancestor))
    }

    /// Configurations that inherit from `configuration`, in topological order.
    pub fn descendants(&self, configuration: &str) -> Vec<String> {
        self.topological_order()
            .into_iter()
            .filter(|c| self.is_ancestor(configuration, c))
            .collect()
    }

    /// Every configuration after all of its ancestors. Roots come in declaration order, the rest
    /// is discovered breadth-first from each root in turn.
    pub fn topological_order(&self) -> Vec<String> {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        let roots = self
            .nodes
            .iter()
            .filter(|node| self.declared_parents(node).next().is_none());

        for root in roots {
            let mut queue: VecDeque<&ConfigNode> = VecDeque::from([root]);
            while let Some(node) = queue.pop_front() {
                if placed.contains(node.name.as_str()) {
                    continue;
                }
                if !self
                    .declared_parents(node)
                    .all(|parent| placed.contains(parent))
                {
                    // Reached again once its last parent is placed.
                    continue;
                }
                placed.insert(node.name.as_str());
                order.push(node.name.clone());
                queue.extend(self.children(&node.name));
            }
        }
        order
    }

    /// The configuration marked `*default`; otherwise the only configuration; otherwise
    /// `full-build`.
    pub fn default_configuration(&self) -> Result<&str, StructureError> {
        let marked: Vec<&ConfigNode> = self.nodes.iter().filter(|n| n.is_default).collect();
        match marked.as_slice() {
            [single] => Ok(single.name.as_str()),
            [] if self.nodes.len() == 1 => Ok(self.nodes[0].name.as_str()),
            [] if self.contains(FULL_BUILD) => Ok(FULL_BUILD),
            [] => Err(StructureError::NoDefault {
                module: self.module.clone(),
            }),
            _ => Err(StructureError::AmbiguousDefault {
                module: self.module.clone(),
                candidates: marked.iter().map(|n| n.name.clone()).collect(),
            }),
        }
    }

    pub fn lookup(&self, configuration: &str) -> ConfigLookup {
        if self.contains(configuration) {
            ConfigLookup::Found(configuration.to_string())
        } else if self.contains(FULL_BUILD) {
            ConfigLookup::FellBackTo(FULL_BUILD.to_string())
        } else {
            ConfigLookup::Missing
        }
    }

    /// The nearest configuration having both `a` and `b` among its ancestors-or-self, that is
    /// the smallest configuration that satisfies a request for either of them. Hierarchies are
    /// drawn with the widest configuration on top, which makes this their lowest common
    /// ancestor. Returns `a` or `b` when one already covers the other.
    pub fn lowest_common_ancestor(&self, a: &str, b: &str) -> Result<String, GraphError> {
        for configuration in [a, b] {
            if !self.contains(configuration) {
                return Err(self.unknown(configuration));
            }
        }

        let candidates: Vec<String> = self
            .topological_order()
            .into_iter()
            .filter(|c| {
                let covered = self.reflexive_ancestors(c);
                covered.iter().any(|x| x == a) && covered.iter().any(|x| x == b)
            })
            .collect();

        candidates
            .iter()
            .find(|c| !candidates.iter().any(|other| self.is_ancestor(other, c)))
            .cloned()
            .ok_or_else(|| GraphError::NoCommonAncestor {
                module: self.module.clone(),
                first: a.to_string(),
                second: b.to_string(),
            })
    }

    /// The nearest configuration every given configuration inherits from (ancestor-or-self of
    /// all of them), reduced pairwise.
    pub fn nearest_common_base(&self, configurations: &[String]) -> Result<String, GraphError> {
        let no_base = || GraphError::NoCommonBase {
            module: self.module.clone(),
            configurations: configurations.to_vec(),
        };

        let (first, rest) = configurations.split_first().ok_or_else(no_base)?;
        if !self.contains(first) {
            return Err(self.unknown(first));
        }

        let mut base = first.clone();
        for other in rest {
            if !self.contains(other) {
                return Err(self.unknown(other));
            }
            let theirs = self.reflexive_ancestors(other);
            let common: Vec<String> = self
                .reflexive_ancestors(&base)
                .into_iter()
                .filter(|c| theirs.contains(c))
                .collect();
            base = common
                .iter()
                .find(|c| !common.iter().any(|other| self.is_ancestor(c, other)))
                .cloned()
                .ok_or_else(no_base)?;
        }
        Ok(base)
    }

    fn unknown(&self, configuration: &str) -> GraphError {
        GraphError::UnknownConfiguration {
            module: self.module.clone(),
            configuration: configuration.to_string(),
        }
    }

    /// Parents that are actually declared in this module.
    fn declared_parents<'a>(&'a self, node: &'a ConfigNode) -> impl Iterator<Item = &'a str> + 'a {
        node.parent_names
            .iter()
            .map(String::as_str)
            .filter(|parent| self.contains(parent))
    }

    fn children<'a>(&'a self, configuration: &'a str) -> impl Iterator<Item = &'a ConfigNode> + 'a {
        self.nodes
            .iter()
            .filter(move |node| node.parent_names.iter().any(|p| p == configuration))
    }

    /// A parent chain leading from `configuration` back to itself, rendered for the error.
    fn find_path_back(&self, configuration: &str) -> Option<String> {
        fn go<'a>(
            graph: &'a ConfigGraph,
            target: &str,
            current: &'a str,
            path: &mut Vec<&'a str>,
            visited: &mut HashSet<&'a str>,
        ) -> bool {
            for parent in graph.immediate_parents(current).unwrap_or_default() {
                if parent == target {
                    return true;
                }
                if visited.insert(parent.as_str()) {
                    path.push(parent.as_str());
                    if go(graph, target, parent, path, visited) {
                        return true;
                    }
                    path.pop();
                }
            }
            false
        }

        let mut path = vec![configuration];
        let mut visited = HashSet::new();
        if go(self, configuration, configuration, &mut path, &mut visited) {
            path.push(configuration);
            Some(path.join(" > "))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn graph(lines: &[&str]) -> ConfigGraph {
        let nodes = lines
            .iter()
            .map(|line| ConfigNode::parse(line).unwrap())
            .collect();
        ConfigGraph::build(ModuleName::from("module"), nodes).unwrap()
    }

    fn sdk_graph() -> ConfigGraph {
        graph(&[
            "client1 *default",
            "client2",
            "sdk > client1, client2",
            "full-build > sdk",
        ])
    }

    #[test]
    fn parents_and_ancestors() {
        let g = sdk_graph();
        assert_eq!(g.immediate_parents("client1"), None);
        assert_eq!(
            g.immediate_parents("sdk"),
            Some(&["client1".to_string(), "client2".to_string()][..])
        );
        assert_eq!(g.all_ancestors("client2"), None);
        assert_eq!(
            g.all_ancestors("full-build"),
            Some(vec![
                "sdk".to_string(),
                "client1".to_string(),
                "client2".to_string()
            ])
        );
        assert!(g.is_ancestor("client1", "full-build"));
        assert!(!g.is_ancestor("full-build", "client1"));
    }

    #[test]
    fn ancestors_first_discovery_wins() {
        let g = graph(&["base", "a > base", "b > base", "c > a, b, base"]);
        assert_eq!(
            g.all_ancestors("c"),
            Some(vec!["a".to_string(), "b".to_string(), "base".to_string()])
        );
    }

    #[test]
    fn topological_order_waits_for_all_parents() {
        let g = graph(&["x > a, b", "a", "y > x", "b"]);
        assert_eq!(g.topological_order(), vec!["a", "b", "x", "y"]);
        assert_eq!(
            sdk_graph().topological_order(),
            vec!["client1", "client2", "sdk", "full-build"]
        );
    }

    #[test]
    fn default_configuration_rules() {
        assert_eq!(sdk_graph().default_configuration().unwrap(), "client1");
        assert_eq!(graph(&["only"]).default_configuration().unwrap(), "only");
        assert_eq!(
            graph(&["client", "full-build > client"])
                .default_configuration()
                .unwrap(),
            "full-build"
        );
        assert!(matches!(
            graph(&["client", "sdk > client"]).default_configuration(),
            Err(StructureError::NoDefault { .. })
        ));
        assert!(matches!(
            graph(&["client *default", "sdk *default"]).default_configuration(),
            Err(StructureError::AmbiguousDefault { .. })
        ));
    }

    #[test]
    fn lowest_common_ancestor_of_siblings() {
        let g = sdk_graph();
        assert_eq!(g.lowest_common_ancestor("client1", "client2").unwrap(), "sdk");
        assert_eq!(g.lowest_common_ancestor("client2", "client1").unwrap(), "sdk");
        assert_eq!(g.lowest_common_ancestor("client1", "full-build").unwrap(), "full-build");
        assert_eq!(g.lowest_common_ancestor("sdk", "sdk").unwrap(), "sdk");
    }

    #[test]
    fn lowest_common_ancestor_fails_for_disjoint_hierarchies() {
        let g = graph(&["a", "b", "c > a"]);
        assert_eq!(
            g.lowest_common_ancestor("b", "c"),
            Err(GraphError::NoCommonAncestor {
                module: ModuleName::from("module"),
                first: "b".to_string(),
                second: "c".to_string(),
            })
        );
        assert!(matches!(
            g.lowest_common_ancestor("a", "missing"),
            Err(GraphError::UnknownConfiguration { .. })
        ));
    }

    #[test]
    fn nearest_common_base() {
        let g = graph(&["client *default", "full-build > client", "tests > client"]);
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            g.nearest_common_base(&names(&["client", "full-build"])).unwrap(),
            "client"
        );
        assert_eq!(
            g.nearest_common_base(&names(&["tests", "full-build"])).unwrap(),
            "client"
        );
        assert_eq!(g.nearest_common_base(&names(&["tests"])).unwrap(), "tests");
        assert!(matches!(
            sdk_graph().nearest_common_base(&names(&["client1", "client2"])),
            Err(GraphError::NoCommonBase { .. })
        ));
    }

    #[test]
    fn lookup_falls_back_to_full_build() {
        let g = graph(&["client", "full-build > client"]);
        assert_eq!(g.lookup("client"), ConfigLookup::Found("client".to_string()));
        assert_eq!(
            g.lookup("sdk"),
            ConfigLookup::FellBackTo("full-build".to_string())
        );
        assert_eq!(graph(&["client"]).lookup("sdk"), ConfigLookup::Missing);
    }

    #[test]
    fn build_rejects_duplicates_and_cycles() {
        let nodes = vec![ConfigNode::new("a"), ConfigNode::new("a")];
        assert!(matches!(
            ConfigGraph::build(ModuleName::from("m"), nodes),
            Err(StructureError::DuplicateConfiguration { .. })
        ));

        let nodes = ["a > b", "b > a"]
            .iter()
            .map(|l| ConfigNode::parse(l).unwrap())
            .collect();
        assert!(matches!(
            ConfigGraph::build(ModuleName::from("m"), nodes),
            Err(StructureError::CyclicConfiguration { .. })
        ));

        let nodes = vec![ConfigNode::parse("a > a").unwrap()];
        assert!(ConfigGraph::build(ModuleName::from("m"), nodes).is_err());
    }

    #[test]
    fn dangling_parent_is_a_no_op_ancestor() {
        let g = graph(&["client > ghost"]);
        assert_eq!(
            g.immediate_parents("client"),
            Some(&["ghost".to_string()][..])
        );
        assert_eq!(g.all_ancestors("client"), None);
        assert!(!g.is_ancestor("ghost", "client"));
        assert_eq!(g.topological_order(), vec!["client"]);
    }
}
