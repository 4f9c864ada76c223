use std::{fmt::Display, sync::OnceLock};

use regex_lite::Regex;

use crate::model::ParseError;

pub const DEFAULT_MARKER: &str = "*default";
pub const FULL_BUILD: &str = "full-build";

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\*\S*").unwrap())
}

/// One configuration declaration, e.g. `full-build > sdk, tests *default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigNode {
    pub name: String,
    /// Declared parents in declaration order, without duplicates.
    pub parent_names: Vec<String>,
    pub is_default: bool,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        ConfigNode {
            name: name.into(),
            parent_names: Vec::new(),
            is_default: false,
        }
    }

    pub fn parse(line: &str) -> Result<ConfigNode, ParseError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyConfigurationLine);
        }

        let marker_re = marker_regex();
        let mut is_default = false;
        for marker in marker_re.find_iter(trimmed) {
            if marker.as_str() != DEFAULT_MARKER || is_default || marker.start() == 0 {
                return Err(ParseError::MalformedDefaultMarker(trimmed.to_string()));
            }
            is_default = true;
        }
        let declaration = marker_re.replace_all(trimmed, " ");

        let (name, parents) = match declaration.split_once('>') {
            Some((name, parents)) => (name.trim(), Some(parents)),
            None => (declaration.trim(), None),
        };
        if name.is_empty() {
            return Err(ParseError::MalformedConfiguration {
                line: trimmed.to_string(),
                reason: "missing configuration name",
            });
        }
        if name.contains(char::is_whitespace) {
            return Err(ParseError::MalformedConfiguration {
                line: trimmed.to_string(),
                reason: "configuration name contains whitespace",
            });
        }

        let mut parent_names: Vec<String> = Vec::new();
        if let Some(parents) = parents {
            if parents.contains('>') {
                return Err(ParseError::MalformedConfiguration {
                    line: trimmed.to_string(),
                    reason: "more than one `>`",
                });
            }
            for parent in parents.split(',').map(str::trim) {
                if parent.is_empty() {
                    return Err(ParseError::EmptyParent(trimmed.to_string()));
                }
                if !parent_names.iter().any(|p| p == parent) {
                    parent_names.push(parent.to_string());
                }
            }
        }

        Ok(ConfigNode {
            name: name.to_string(),
            parent_names,
            is_default,
        })
    }
}

impl Display for ConfigNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if !self.parent_names.is_empty() {
            write!(f, " > {}", self.parent_names.join(", "))?;
        }
        if self.is_default {
            write!(f, " {}", DEFAULT_MARKER)?;
        }
        Ok(())
    }
}
