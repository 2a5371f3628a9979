//! Local package manifests (`package.json`) as a source of requests.
//!
//! Fetching "everything this project depends on" is a walk whose top-level
//! requests are the manifest's `dependencies`, plus its `devDependencies`
//! when asked. Each entry becomes one [`FetchRequest`], in declared order.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::constraint::is_source_control;
use super::types::FetchRequest;

/// Errors raised while reading a package manifest.
#[derive(Debug, Error)]
pub enum PackageFileError {
    /// The document is not valid JSON or not an object.
    #[error("invalid package file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A dependency entry is not a constraint string.
    #[error("invalid constraint for dependency '{name}': expected a string")]
    InvalidEntry { name: String },
}

#[derive(Debug, Deserialize)]
struct RawPackageFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    dependencies: Map<String, Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: Map<String, Value>,
}

/// Requests derived from a package manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageFile {
    /// The manifest's own `name`, if it has one.
    pub name: Option<String>,
    /// One request per dependency, dependencies first, in declared order.
    pub requests: Vec<FetchRequest>,
    /// Dependencies left out because they point at source control.
    pub skipped: Vec<String>,
}

impl PackageFile {
    /// Parse a `package.json` document.
    ///
    /// A module listed in both `dependencies` and `devDependencies` is
    /// requested once, with the `dependencies` constraint.
    pub fn parse(bytes: &[u8], include_dev_dependencies: bool) -> Result<Self, PackageFileError> {
        let raw: RawPackageFile = serde_json::from_slice(bytes)?;

        let mut file = PackageFile {
            name: raw.name,
            ..PackageFile::default()
        };
        file.push_all(&raw.dependencies)?;
        if include_dev_dependencies {
            file.push_all(&raw.dev_dependencies)?;
        }
        debug!(
            name = ?file.name,
            requests = file.requests.len(),
            skipped = file.skipped.len(),
            "Parsed package file"
        );
        Ok(file)
    }

    fn push_all(&mut self, entries: &Map<String, Value>) -> Result<(), PackageFileError> {
        for (name, value) in entries {
            let constraint = value
                .as_str()
                .ok_or_else(|| PackageFileError::InvalidEntry { name: name.clone() })?
                .trim();

            if self.requests.iter().any(|request| &request.name == name) {
                continue;
            }
            if is_source_control(constraint) {
                self.skipped.push(name.clone());
                continue;
            }

            self.requests.push(if constraint.is_empty() {
                FetchRequest::new(name.as_str())
            } else {
                FetchRequest::with_constraint(name.as_str(), constraint)
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "my-app",
        "version": "0.1.0",
        "dependencies": {
            "react": "^18.2.0",
            "@babel/runtime": "7.x",
            "forked": "git+https://github.com/someone/forked.git",
            "anything": ""
        },
        "devDependencies": {
            "jest": "^29.0.0",
            "react": "^17.0.0"
        }
    }"#;

    #[test]
    fn test_dependencies_in_declared_order() {
        let file = PackageFile::parse(MANIFEST.as_bytes(), false).unwrap();

        assert_eq!(file.name.as_deref(), Some("my-app"));
        assert_eq!(
            file.requests,
            vec![
                FetchRequest::with_constraint("react", "^18.2.0"),
                FetchRequest::with_constraint("@babel/runtime", "7.x"),
                FetchRequest::new("anything"),
            ]
        );
        assert_eq!(file.skipped, vec!["forked".to_string()]);
    }

    #[test]
    fn test_dev_dependencies_follow_and_do_not_duplicate() {
        let file = PackageFile::parse(MANIFEST.as_bytes(), true).unwrap();

        let names: Vec<&str> = file.requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["react", "@babel/runtime", "anything", "jest"]);
        assert_eq!(file.requests[0].version_constraint.as_deref(), Some("^18.2.0"));
    }

    #[test]
    fn test_no_dependencies() {
        let file = PackageFile::parse(br#"{"name": "empty"}"#, true).unwrap();
        assert!(file.requests.is_empty());
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            PackageFile::parse(b"not json", false),
            Err(PackageFileError::Parse(_))
        ));
        assert!(matches!(
            PackageFile::parse(br#"{"dependencies": {"react": 18}}"#, false),
            Err(PackageFileError::InvalidEntry { name }) if name == "react"
        ));
    }
}
