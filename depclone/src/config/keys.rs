//! `section.key` names for command-line access to settings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, ConfigFile};
use crate::provider::Ecosystem;
use crate::walker::AuxiliaryPolicy;

/// Every setting addressable as `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    RegistryNpmUrl,
    RegistryPypiUrl,
    RegistryTimeoutSecs,
    RegistryUserAgent,
    FetchEcosystem,
    FetchIncludeDependencies,
    FetchIncludeDevDependencies,
    FetchIncludeTypes,
    FetchAuxiliaryPolicy,
    FetchFanOut,
    FetchProgressThresholdBytes,
    LoggingLevel,
    LoggingDirectory,
}

impl ConfigKey {
    /// All keys, grouped by section in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::RegistryNpmUrl,
            ConfigKey::RegistryPypiUrl,
            ConfigKey::RegistryTimeoutSecs,
            ConfigKey::RegistryUserAgent,
            ConfigKey::FetchEcosystem,
            ConfigKey::FetchIncludeDependencies,
            ConfigKey::FetchIncludeDevDependencies,
            ConfigKey::FetchIncludeTypes,
            ConfigKey::FetchAuxiliaryPolicy,
            ConfigKey::FetchFanOut,
            ConfigKey::FetchProgressThresholdBytes,
            ConfigKey::LoggingLevel,
            ConfigKey::LoggingDirectory,
        ]
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::RegistryNpmUrl
            | ConfigKey::RegistryPypiUrl
            | ConfigKey::RegistryTimeoutSecs
            | ConfigKey::RegistryUserAgent => "registry",
            ConfigKey::FetchEcosystem
            | ConfigKey::FetchIncludeDependencies
            | ConfigKey::FetchIncludeDevDependencies
            | ConfigKey::FetchIncludeTypes
            | ConfigKey::FetchAuxiliaryPolicy
            | ConfigKey::FetchFanOut
            | ConfigKey::FetchProgressThresholdBytes => "fetch",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::RegistryNpmUrl => "npm_url",
            ConfigKey::RegistryPypiUrl => "pypi_url",
            ConfigKey::RegistryTimeoutSecs => "timeout_secs",
            ConfigKey::RegistryUserAgent => "user_agent",
            ConfigKey::FetchEcosystem => "ecosystem",
            ConfigKey::FetchIncludeDependencies => "include_dependencies",
            ConfigKey::FetchIncludeDevDependencies => "include_dev_dependencies",
            ConfigKey::FetchIncludeTypes => "include_types",
            ConfigKey::FetchAuxiliaryPolicy => "auxiliary_policy",
            ConfigKey::FetchFanOut => "fan_out",
            ConfigKey::FetchProgressThresholdBytes => "progress_threshold_bytes",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::RegistryNpmUrl => config.registry.npm_url.clone(),
            ConfigKey::RegistryPypiUrl => config.registry.pypi_url.clone(),
            ConfigKey::RegistryTimeoutSecs => config.registry.timeout_secs.to_string(),
            ConfigKey::RegistryUserAgent => config.registry.user_agent.clone().unwrap_or_default(),
            ConfigKey::FetchEcosystem => config.fetch.ecosystem.to_string(),
            ConfigKey::FetchIncludeDependencies => config.fetch.include_dependencies.to_string(),
            ConfigKey::FetchIncludeDevDependencies => {
                config.fetch.include_dev_dependencies.to_string()
            }
            ConfigKey::FetchIncludeTypes => config.fetch.include_types.to_string(),
            ConfigKey::FetchAuxiliaryPolicy => config.fetch.auxiliary_policy.to_string(),
            ConfigKey::FetchFanOut => config.fetch.fan_out.to_string(),
            ConfigKey::FetchProgressThresholdBytes => {
                config.fetch.progress_threshold_bytes.to_string()
            }
            ConfigKey::LoggingLevel => config.logging.level.clone().unwrap_or_default(),
            ConfigKey::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Validate `value` and store it. An empty value clears optional keys.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            ConfigKey::RegistryNpmUrl => config.registry.npm_url = self.parse_url(value)?,
            ConfigKey::RegistryPypiUrl => config.registry.pypi_url = self.parse_url(value)?,
            ConfigKey::RegistryTimeoutSecs => {
                let secs: u64 = self.parse_number(value)?;
                if secs == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.registry.timeout_secs = secs;
            }
            ConfigKey::RegistryUserAgent => config.registry.user_agent = optional(value),
            ConfigKey::FetchEcosystem => {
                config.fetch.ecosystem = value
                    .parse::<Ecosystem>()
                    .map_err(|e| self.invalid(value, &e.to_string()))?;
            }
            ConfigKey::FetchIncludeDependencies => {
                config.fetch.include_dependencies = self.parse_bool(value)?
            }
            ConfigKey::FetchIncludeDevDependencies => {
                config.fetch.include_dev_dependencies = self.parse_bool(value)?
            }
            ConfigKey::FetchIncludeTypes => config.fetch.include_types = self.parse_bool(value)?,
            ConfigKey::FetchAuxiliaryPolicy => {
                config.fetch.auxiliary_policy = value
                    .parse::<AuxiliaryPolicy>()
                    .map_err(|reason| self.invalid(value, &reason))?;
            }
            ConfigKey::FetchFanOut => {
                let fan_out: usize = self.parse_number(value)?;
                if fan_out == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.fetch.fan_out = fan_out;
            }
            ConfigKey::FetchProgressThresholdBytes => {
                config.fetch.progress_threshold_bytes = self.parse_number(value)?
            }
            ConfigKey::LoggingLevel => config.logging.level = optional(value),
            ConfigKey::LoggingDirectory => {
                config.logging.directory = optional(value).map(PathBuf::from)
            }
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }

    fn parse_number<T: FromStr>(&self, value: &str) -> Result<T, ConfigError> {
        value
            .parse()
            .map_err(|_| self.invalid(value, "expected a non-negative integer"))
    }

    fn parse_url(&self, value: &str) -> Result<String, ConfigError> {
        if value.starts_with("http://") || value.starts_with("https://") {
            Ok(value.trim_end_matches('/').to_string())
        } else {
            Err(self.invalid(value, "expected an http:// or https:// URL"))
        }
    }
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
