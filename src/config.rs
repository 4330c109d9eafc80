//! Startup configuration: the initial backend registrations and mount
//! replay list (spec §6, "the broker recovers by replaying mounts from its
//! configuration at startup").
//!
//! Grounded on the teacher's hand-rolled error enums (`error.rs`,
//! `vfs::NfsError`) rather than reaching for `anyhow`/`thiserror`.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendConfig>,
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub instance: u64,
    /// Directory to shadow on disk; absent means an in-memory backend.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MountConfig {
    pub point: String,
    pub backend: String,
    pub instance: u64,
    #[serde(default)]
    pub options: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
    UnknownBackend(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "could not read config file: {err}"),
            ConfigError::Parse(err) => write!(f, "could not parse config file: {err}"),
            ConfigError::UnknownBackend(name) => {
                write!(f, "mount refers to undeclared backend {name:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Config = toml::from_str(&text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for mount in &self.mounts {
            if !self.backends.iter().any(|b| b.name == mount.backend) {
                return Err(ConfigError::UnknownBackend(mount.backend.clone()));
            }
        }
        Ok(())
    }
}
