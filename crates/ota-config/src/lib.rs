// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent configuration: identity and filesystem roots.
//!
//! Loaded once at startup from a TOML file; every path the agent writes
//! under is declared here, never computed ad hoc.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ota_result::codes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML failed to parse.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is present but unusable.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl ConfigError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::Io(_) | Self::Parse(_) | Self::Invalid(_) => codes::CONFIG_INVALID,
        }
    }
}

/// Device identity reported in compatibility checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentIdentity {
    /// Device manufacturer.
    pub manufacturer: String,
    /// Device model.
    pub model: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "unknown".into(),
            model: "unknown".into(),
        }
    }
}

/// Filesystem roots the agent owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentPaths {
    /// Per-deployment sandboxes live under this root, keyed by workflow id.
    pub downloads_folder: PathBuf,
    /// Content-addressed source-update cache root.
    pub source_update_cache: PathBuf,
    /// Persisted root-key package overlay.
    pub root_key_package: PathBuf,
}

impl Default for AgentPaths {
    fn default() -> Self {
        Self {
            downloads_folder: PathBuf::from("/var/lib/ota-agent/downloads"),
            source_update_cache: PathBuf::from("/var/lib/ota-agent/sdc"),
            root_key_package: PathBuf::from("/var/lib/ota-agent/rootkeys.json"),
        }
    }
}

/// The agent's full configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AgentConfig {
    /// Identity section.
    pub agent: AgentIdentity,
    /// Filesystem section.
    pub paths: AgentPaths,
}

impl AgentConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses and validates a configuration document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.manufacturer.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.manufacturer must not be empty"));
        }
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.model must not be empty"));
        }
        if self.paths.downloads_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.downloads-folder must not be empty"));
        }
        if self.paths.source_update_cache.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "paths.source-update-cache must not be empty",
            ));
        }
        if self.paths.root_key_package.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.root-key-package must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_full_document() {
        let config = AgentConfig::from_toml(
            r#"
            [agent]
            manufacturer = "contoso"
            model = "toaster"

            [paths]
            downloads-folder = "/data/ota/downloads"
            source-update-cache = "/data/ota/sdc"
            root-key-package = "/data/ota/rootkeys.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.manufacturer, "contoso");
        assert_eq!(config.paths.downloads_folder, PathBuf::from("/data/ota/downloads"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = AgentConfig::from_toml("[agent]\nmanufacturer = \"contoso\"\n").unwrap();
        assert_eq!(config.agent.model, "unknown");
        assert_eq!(config.paths, AgentPaths::default());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let err = AgentConfig::from_toml("[agent]\nmanufacturer = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.erc(), codes::CONFIG_INVALID);
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[agent]\nmanufacturer = \"contoso\"\nmodel = \"camera\"\n").unwrap();
        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.agent.model, "camera");

        assert!(matches!(
            AgentConfig::load(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(matches!(
            AgentConfig::from_toml("not = [valid"),
            Err(ConfigError::Parse(_))
        ));
    }
}
