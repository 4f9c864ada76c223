pub mod configuration;
pub mod coordinate;
pub mod dep;
pub mod spec;
pub mod value;

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading module spec: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Configuration line is empty")]
    EmptyConfigurationLine,
    #[error("Malformed default marker in configuration line `{0}`")]
    MalformedDefaultMarker(String),
    #[error("Empty parent name in configuration line `{0}`")]
    EmptyParent(String),
    #[error("Malformed configuration line `{line}`: {reason}")]
    MalformedConfiguration { line: String, reason: &'static str },
    #[error("Dependency line is empty")]
    EmptyDependencyLine,
    #[error("Malformed dependency line `{line}`: {reason}")]
    MalformedDependency { line: String, reason: &'static str },
    #[error("Missing key `{0}` while parsing")]
    MissingKey(String),
    #[error("Expected {expected} for `{key}`")]
    UnexpectedValue { key: String, expected: &'static str },
    #[error("Missing url component `{0}` in string `{1}`")]
    MissingUrlComponent(String, String),
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
}

/// Structural errors of one module's spec. Every variant names the module and the section
/// that has to be fixed.
#[derive(Error, Debug)]
pub enum StructureError {
    #[error("{module}: invalid entry in section `{section}`: {source}")]
    InvalidEntry {
        module: ModuleName,
        section: String,
        #[source]
        source: ParseError,
    },
    #[error("{module}: section `{section}` must be a table")]
    InvalidSection { module: ModuleName, section: String },
    #[error("{module}: configuration `{configuration}` is declared more than once")]
    DuplicateConfiguration {
        module: ModuleName,
        configuration: String,
    },
    #[error("{module}: configuration `{configuration}` inherits from itself through `{through}`")]
    CyclicConfiguration {
        module: ModuleName,
        configuration: String,
        through: String,
    },
    #[error("{module}: several configurations are marked *default: {candidates:?}")]
    AmbiguousDefault {
        module: ModuleName,
        candidates: Vec<String>,
    },
    #[error("{module}: no configuration is marked *default and there is no `full-build`")]
    NoDefault { module: ModuleName },
    #[error("{module}: configuration `{configuration}` does not exist")]
    UnknownConfiguration {
        module: ModuleName,
        configuration: String,
    },
    #[error("{module}/{configuration}: dependency `{dep}` is deleted but not added")]
    DeletedButNotAdded {
        module: ModuleName,
        configuration: String,
        dep: String,
    },
    #[error("{module}/{configuration}: dependency `{name}` is declared twice (`{first}` and `{second}`)")]
    DuplicateDependency {
        module: ModuleName,
        configuration: String,
        name: ModuleName,
        first: String,
        second: String,
    },
}

#[derive(Clone, Hash, Deserialize, Serialize, Debug, PartialEq, Eq, Ord, PartialOrd)]
pub struct ModuleName(String);

impl ModuleName {
    pub fn new(s: String) -> Self {
        ModuleName(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ModuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModuleName {
    fn from(s: String) -> Self {
        ModuleName(s)
    }
}

impl From<&str> for ModuleName {
    fn from(s: &str) -> Self {
        ModuleName(s.to_string())
    }
}
