//! INI configuration file.
//!
//! Settings live in `<config_dir>/depclone/config.ini`:
//!
//! ```ini
//! [registry]
//! npm_url = https://registry.npmjs.org
//! pypi_url = https://pypi.org/pypi
//! timeout_secs = 30
//!
//! [fetch]
//! ecosystem = npm
//! include_dependencies = true
//! include_dev_dependencies = false
//! include_types = false
//! auxiliary_policy = all
//! fan_out = 8
//! progress_threshold_bytes = 2097152
//!
//! [logging]
//! level = info
//! ```
//!
//! Missing keys take their defaults. Unknown keys are ignored so that older
//! binaries can read newer files.

mod keys;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::events::DEFAULT_PROGRESS_THRESHOLD;
use crate::provider::{
    default_user_agent, ClientConfig, Ecosystem, DEFAULT_TIMEOUT_SECS, NPM_REGISTRY_URL,
    PYPI_REGISTRY_URL,
};
use crate::walker::{AuxiliaryPolicy, WalkOptions, DEFAULT_FAN_OUT};

pub use keys::ConfigKey;

/// Default log level when neither `RUST_LOG` nor the config file set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors reading, writing or editing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// `[registry]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub npm_url: String,
    pub pypi_url: String,
    pub timeout_secs: u64,
    /// Overrides the default `depclone/<version>` user agent.
    pub user_agent: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            npm_url: NPM_REGISTRY_URL.to_string(),
            pypi_url: PYPI_REGISTRY_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub ecosystem: Ecosystem,
    pub include_dependencies: bool,
    pub include_dev_dependencies: bool,
    pub include_types: bool,
    pub auxiliary_policy: AuxiliaryPolicy,
    pub fan_out: usize,
    pub progress_threshold_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            ecosystem: Ecosystem::default(),
            include_dependencies: true,
            include_dev_dependencies: false,
            include_types: false,
            auxiliary_policy: AuxiliaryPolicy::default(),
            fan_out: DEFAULT_FAN_OUT,
            progress_threshold_bytes: DEFAULT_PROGRESS_THRESHOLD,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `None` means [`DEFAULT_LOG_LEVEL`].
    pub level: Option<String>,
    /// Log file directory; `None` means [`default_log_directory`].
    pub directory: Option<PathBuf>,
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigFile {
    pub registry: RegistrySettings,
    pub fetch: FetchSettings,
    pub logging: LoggingSettings,
}

/// Path of the user's configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depclone")
        .join("config.ini")
}

/// Directory for log files when the config does not name one.
pub fn default_log_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("depclone")
        .join("logs")
}

impl ConfigFile {
    /// Load the user's configuration file, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Save to the user's configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Write every key to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini
    }

    /// Client configuration for the registry providers.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            npm_url: self.registry.npm_url.clone(),
            pypi_url: self.registry.pypi_url.clone(),
            timeout: Duration::from_secs(self.registry.timeout_secs),
            user_agent: self
                .registry
                .user_agent
                .clone()
                .unwrap_or_else(default_user_agent),
        }
    }

    /// Walk options from the `[fetch]` section.
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            include_dependencies: self.fetch.include_dependencies,
            include_dev_dependencies: self.fetch.include_dev_dependencies,
            include_auxiliary_artifacts: self.fetch.include_types,
            auxiliary_policy: self.fetch.auxiliary_policy,
            fan_out: self.fetch.fan_out,
        }
    }

    /// Effective log level directive.
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Effective log directory.
    pub fn log_directory(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(default_log_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.client_config(), ClientConfig::default());
        assert_eq!(config.walk_options(), WalkOptions::default());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(
            &path,
            "[fetch]\necosystem = pypi\nfan_out = 2\n\n[logging]\nlevel = debug\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.fetch.ecosystem, Ecosystem::Pypi);
        assert_eq!(config.fetch.fan_out, 2);
        assert!(config.fetch.include_dependencies);
        assert_eq!(config.registry, RegistrySettings::default());
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.registry.npm_url = "http://localhost:4873".to_string();
        config.registry.user_agent = Some("mirror-bot/1.0".to_string());
        config.fetch.include_types = true;
        config.fetch.auxiliary_policy = AuxiliaryPolicy::TopLevelOnly;
        config.logging.directory = Some(PathBuf::from("/var/log/depclone"));
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.client_config().user_agent, "mirror-bot/1.0");
        assert!(loaded.walk_options().include_auxiliary_artifacts);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[registry]\ntimeout_secs = soon\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "registry.timeout_secs"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[fetch]\nparallel_mirrors = 3\n[extra]\nx = y\n").unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_config_file_path_location() {
        let path = config_file_path();
        assert!(path.ends_with("depclone/config.ini"));
    }
}
