use std::{fmt::Display, str::FromStr};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::model::ParseError;

/// Where a module's repository lives, as written in the module registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleLocation {
    /// `forge/organization/repository`, turned into a URL with the configured protocol.
    Coordinate(Coordinate),
    /// Anything else that git understands: `https://...`, `ssh://...`, a local path.
    Url(String),
}

impl ModuleLocation {
    pub fn parse(value: &str) -> Result<ModuleLocation, ParseError> {
        let value = value.trim();
        if value.contains("://") || value.starts_with('/') || value.starts_with('.') {
            Ok(ModuleLocation::Url(value.to_string()))
        } else {
            Coordinate::from_url(value).map(ModuleLocation::Coordinate)
        }
    }

    pub fn to_git_url(&self, default_protocol: Protocol) -> String {
        match self {
            ModuleLocation::Coordinate(coordinate) => coordinate.to_git_url(default_protocol),
            ModuleLocation::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Coordinate {
    pub forge: String,
    pub organization: String,
    pub repository: String,
}

impl Coordinate {
    pub fn from_url(url: &str) -> Result<Coordinate, ParseError> {
        let re: Regex =
            Regex::new(r"^(?P<forge>[^/]+)/(?P<organization>[^/]+)/(?P<repository>[^/]+)/?$")
                .unwrap();
        let url_parse_results = re.captures(url);
        let url_parse_results = url_parse_results.as_ref();
        let component = |component: &str| {
            url_parse_results
                .and_then(|c| c.name(component))
                .map(|s| s.as_str().to_string())
                .ok_or_else(|| {
                    ParseError::MissingUrlComponent(component.to_string(), url.to_string())
                })
        };

        Ok(Coordinate {
            forge: component("forge")?,
            organization: component("organization")?,
            repository: component("repository")?,
        })
    }

    pub fn to_git_url(&self, protocol: Protocol) -> String {
        match protocol {
            Protocol::Https => format!(
                "https://{}/{}/{}",
                self.forge, self.organization, self.repository
            ),
            Protocol::Ssh => format!(
                "ssh://git@{}/{}/{}.git",
                self.forge, self.organization, self.repository
            ),
        }
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.forge, self.organization, self.repository
        )
    }
}

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, Ord, PartialOrd, Default)]
pub enum Protocol {
    #[serde(rename = "https")]
    #[default]
    Https,
    #[serde(rename = "ssh")]
    Ssh,
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "https" => Ok(Protocol::Https),
            "ssh" => Ok(Protocol::Ssh),
            _ => Err(ParseError::InvalidProtocol(value)),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Protocol::Https => f.write_str("https"),
            Protocol::Ssh => f.write_str("ssh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn build_coordinate_slash() {
        let str = "github.com/acme/billing-core/";
        assert_eq!(
            Coordinate::from_url(str).unwrap(),
            Coordinate {
                forge: "github.com".to_owned(),
                organization: "acme".to_owned(),
                repository: "billing-core".to_owned(),
            }
        );
    }

    #[test]
    fn location_urls() {
        let coordinate = ModuleLocation::parse("github.com/acme/billing-core").unwrap();
        assert_eq!(
            coordinate.to_git_url(Protocol::Ssh),
            "ssh://git@github.com/acme/billing-core.git"
        );
        assert_eq!(
            coordinate.to_git_url(Protocol::Https),
            "https://github.com/acme/billing-core"
        );
        let local = ModuleLocation::parse("/srv/git/billing-core.git").unwrap();
        assert_eq!(local.to_git_url(Protocol::Ssh), "/srv/git/billing-core.git");
        assert!(ModuleLocation::parse("github.com/acme").is_err());
    }
}
