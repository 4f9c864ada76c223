use std::fmt::{Display, Write};

use crate::model::{value::RawValue, ModuleName, ParseError};

/// Matches any treeish or configuration when used in a removal pattern.
pub const WILDCARD: &str = "*";

/// One dependency edge: a module, optionally pinned to a treeish and a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dep {
    pub name: ModuleName,
    pub treeish: Option<String>,
    pub configuration: Option<String>,
    pub need_src: bool,
}

impl Dep {
    pub fn new(name: impl Into<ModuleName>) -> Self {
        Dep {
            name: name.into(),
            treeish: None,
            configuration: None,
            need_src: false,
        }
    }

    pub fn with_treeish(mut self, treeish: impl Into<String>) -> Self {
        self.treeish = Some(treeish.into());
        self
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// Parses `name[@treeish][/configuration]` or `name[/configuration][@treeish]`.
    ///
    /// A backslash escapes the next `@` or `/`, so branch names such as `release/1.0` can be
    /// written as `module@release\/1.0`.
    pub fn parse(line: &str) -> Result<Dep, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::EmptyDependencyLine);
        }
        let malformed = |reason| ParseError::MalformedDependency {
            line: line.to_string(),
            reason,
        };

        let mut parts: Vec<(Option<char>, String)> = Vec::new();
        let mut marker = None;
        let mut current = String::new();
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(malformed("dangling escape")),
                },
                '@' | '/' => {
                    parts.push((marker, std::mem::take(&mut current)));
                    marker = Some(c);
                }
                _ => current.push(c),
            }
        }
        parts.push((marker, current));

        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some((_, name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(malformed("missing module name")),
        };

        let mut dep = Dep::new(name);
        for (marker, value) in parts {
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(malformed("empty treeish or configuration"));
            }
            match marker {
                Some('@') if dep.treeish.is_none() => dep.treeish = Some(value),
                Some('/') if dep.configuration.is_none() => dep.configuration = Some(value),
                Some('@') => return Err(malformed("treeish given twice")),
                _ => return Err(malformed("configuration given twice")),
            }
        }
        Ok(dep)
    }

    /// Parses the table form `{ name, treeish, configuration, src }`.
    pub fn from_raw_map(value: &RawValue) -> Result<Dep, ParseError> {
        let field = |key: &str| -> Result<Option<String>, ParseError> {
            match value.get(key) {
                None => Ok(None),
                Some(RawValue::Str(s)) if s.trim().is_empty() => Ok(None),
                Some(RawValue::Str(s)) => Ok(Some(s.trim().to_string())),
                Some(_) => Err(ParseError::UnexpectedValue {
                    key: key.to_string(),
                    expected: "a string",
                }),
            }
        };
        let name = field("name")?.ok_or_else(|| ParseError::MissingKey("name".to_string()))?;
        let need_src = match field("src")?.as_deref() {
            None | Some("false") => false,
            Some("true") => true,
            Some(_) => {
                return Err(ParseError::UnexpectedValue {
                    key: "src".to_string(),
                    expected: "a boolean",
                })
            }
        };
        Ok(Dep {
            name: ModuleName::new(name),
            treeish: field("treeish")?,
            configuration: field("configuration")?,
            need_src,
        })
    }

    /// Dependency-match semantics: names are equal, treeish and configuration are equal unless
    /// this pattern leaves them unset or sets them to `*`.
    pub fn matches(&self, other: &Dep) -> bool {
        fn field_matches(pattern: &Option<String>, value: &Option<String>) -> bool {
            match pattern.as_deref() {
                None | Some(WILDCARD) => true,
                Some(p) => value.as_deref() == Some(p),
            }
        }
        self.name == other.name
            && field_matches(&self.treeish, &other.treeish)
            && field_matches(&self.configuration, &other.configuration)
    }

    pub fn to_raw(&self) -> RawValue {
        if self.need_src {
            let mut entries = vec![("name".to_string(), RawValue::Str(self.name.to_string()))];
            if let Some(treeish) = &self.treeish {
                entries.push(("treeish".to_string(), RawValue::Str(treeish.clone())));
            }
            if let Some(configuration) = &self.configuration {
                entries.push((
                    "configuration".to_string(),
                    RawValue::Str(configuration.clone()),
                ));
            }
            entries.push(("src".to_string(), RawValue::Str("true".to_string())));
            RawValue::Map(entries)
        } else {
            RawValue::Str(self.to_string())
        }
    }
}

fn write_escaped(f: &mut std::fmt::Formatter<'_>, s: &str) -> std::fmt::Result {
    for c in s.chars() {
        if matches!(c, '@' | '/' | '\\') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

impl Display for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name.as_str())?;
        if let Some(treeish) = &self.treeish {
            f.write_char('@')?;
            write_escaped(f, treeish)?;
        }
        if let Some(configuration) = &self.configuration {
            f.write_char('/')?;
            write_escaped(f, configuration)?;
        }
        Ok(())
    }
}
