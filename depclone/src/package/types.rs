//! Core package data types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One top-level module the caller wants fetched.
///
/// Immutable once submitted to a walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Module name as published (e.g., `left-pad`, `@babel/core`).
    pub name: String,
    /// Optional version constraint (e.g., `^1.2.0`, `latest`).
    pub version_constraint: Option<String>,
}

impl FetchRequest {
    /// Request a module at whatever version the registry prefers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: None,
        }
    }

    /// Request a module with a version constraint.
    pub fn with_constraint(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_constraint: Some(constraint.into()),
        }
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_constraint {
            Some(constraint) => write!(f, "{}@{}", self.name, constraint),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for FetchRequest {
    type Err = String;

    /// Parse `name`, `name@constraint`, `@scope/name` or `@scope/name@constraint`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("module name cannot be empty".to_string());
        }

        // Skip a leading scope marker so `@scope/name` is not split at index 0
        let search_from = usize::from(s.starts_with('@'));
        let (name, constraint) = match s[search_from..].find('@') {
            Some(idx) => {
                let split = search_from + idx;
                (&s[..split], Some(&s[split + 1..]))
            }
            None => (s, None),
        };

        if name.is_empty() {
            return Err(format!("missing module name in '{}'", s));
        }
        if name.starts_with('@') && !name.contains('/') {
            return Err(format!("scoped module name must look like @scope/name: '{}'", s));
        }

        match constraint.filter(|c| !c.is_empty()) {
            Some(constraint) => Ok(Self::with_constraint(name, constraint)),
            None => Ok(Self::new(name)),
        }
    }
}

/// One declared dependency: name and version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub constraint: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
        }
    }
}

/// Resolved metadata for one concrete module version.
///
/// Produced by a provider after version resolution and read-only afterward.
/// Dependency lists keep the order in which the manifest declares them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
    pub dev_dependencies: Vec<Dependency>,
    /// Artifact locations (one for npm, one per distribution file for PyPI).
    pub artifact_urls: Vec<String>,
}

/// The on-storage result of fetching one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedModule {
    /// Directory the module was written into.
    pub directory: PathBuf,
    /// Payload files written under `directory`.
    pub payloads: Vec<PathBuf>,
    /// Manifest snapshot written under `directory/packages`.
    pub manifest_path: PathBuf,
    /// Descriptor parsed from the registry response.
    pub manifest: ManifestDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_name() {
        let req: FetchRequest = "left-pad".parse().unwrap();
        assert_eq!(req, FetchRequest::new("left-pad"));
    }

    #[test]
    fn test_parse_name_with_constraint() {
        let req: FetchRequest = "left-pad@^1.3.0".parse().unwrap();
        assert_eq!(req, FetchRequest::with_constraint("left-pad", "^1.3.0"));
    }

    #[test]
    fn test_parse_scoped_names() {
        let req: FetchRequest = "@babel/core".parse().unwrap();
        assert_eq!(req, FetchRequest::new("@babel/core"));

        let req: FetchRequest = "@babel/core@7.24.0".parse().unwrap();
        assert_eq!(req, FetchRequest::with_constraint("@babel/core", "7.24.0"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!("".parse::<FetchRequest>().is_err());
        assert!("@1.0.0".parse::<FetchRequest>().is_err());
    }

    #[test]
    fn test_trailing_at_is_unconstrained() {
        let req: FetchRequest = "react@".parse().unwrap();
        assert_eq!(req.version_constraint, None);
    }

    #[test]
    fn test_display() {
        assert_eq!(FetchRequest::new("a").to_string(), "a");
        assert_eq!(FetchRequest::with_constraint("a", "1.x").to_string(), "a@1.x");
    }
}
