//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use depclone::{ConfigError, SessionError};

/// Errors that end a CLI command.
#[derive(Debug)]
pub enum CliError {
    /// Invalid configuration or arguments.
    Config(String),

    /// A module argument could not be parsed.
    InvalidRequest(String),

    /// The `--package` file could not be read or parsed.
    PackageFile { path: PathBuf, reason: String },

    /// Failed to create the Tokio runtime.
    Runtime(String),

    /// The fetch session could not be set up.
    Session(SessionError),

    /// The fetch reported a fatal error.
    Fetch(String),

    /// The user interrupted the fetch.
    Cancelled,

    /// Writing the archive failed.
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CliError {
    /// Process exit code; 130 for an interrupted fetch, like a shell would.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Cancelled => 130,
            CliError::Config(_) | CliError::InvalidRequest(_) | CliError::PackageFile { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::InvalidRequest(msg) => write!(f, "Invalid module: {}", msg),
            CliError::PackageFile { path, reason } => {
                write!(f, "Failed to read package file {}: {}", path.display(), reason)
            }
            CliError::Runtime(msg) => write!(f, "Failed to create Tokio runtime: {}", msg),
            CliError::Session(e) => write!(f, "Failed to start fetch: {}", e),
            CliError::Fetch(msg) => write!(f, "Fetch failed: {}", msg),
            CliError::Cancelled => write!(f, "Fetch cancelled"),
            CliError::Output { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Session(e) => Some(e),
            CliError::Output { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        CliError::Session(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Cancelled.exit_code(), 130);
        assert_eq!(CliError::Config("x".into()).exit_code(), 2);
        assert_eq!(CliError::Fetch("x".into()).exit_code(), 1);
        let package = CliError::PackageFile {
            path: PathBuf::from("package.json"),
            reason: "missing".into(),
        };
        assert_eq!(package.exit_code(), 2);
        assert_eq!(
            package.to_string(),
            "Failed to read package file package.json: missing"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: CliError = ConfigError::UnknownKey("fetch.nope".into()).into();
        assert!(err.to_string().contains("fetch.nope"));
    }
}
