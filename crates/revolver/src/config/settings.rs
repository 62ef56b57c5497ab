//! Configuration file loading.
//!
//! The file is YAML with a `revolver:` root key; its location comes from
//! `REVOLVER_CONFIG_PATH` and defaults to `./config.yml`.

use crate::models::settings::{RootConfig, Settings};
use log::info;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Resolves the config path from the environment.
pub fn config_path() -> String {
    std::env::var("REVOLVER_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Loads and parses the configuration file.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(&config_path())
}

/// Loads a specific configuration file.
pub fn load_settings_from(path: &str) -> Result<Settings, SettingsError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_string(),
        source,
    })?;
    let root: RootConfig = serde_yaml::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_string(),
        source,
    })?;
    info!(
        "loaded configuration from {} ({} services)",
        path,
        root.revolver.services.len()
    );
    Ok(root.revolver)
}

/// Parses configuration from a raw document, as fetched by the dynamic
/// config poller.
pub fn parse_settings(raw: &str) -> Result<Settings, serde_yaml::Error> {
    let root: RootConfig = serde_yaml::from_str(raw)?;
    Ok(root.revolver)
}
