//! Config loading for the billing sync engine.
//!
//! The config lives at `~/.billing-sync/config.json` unless a path is given.
//! A missing file is not an error: the engine runs on defaults.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::types::SyncConfig;

/// Directory holding the config file and the default database.
pub fn state_dir() -> Result<PathBuf, SyncError> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".billing-sync"))
}

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, SyncError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => state_dir()?.join("config.json"),
    };

    if !config_path.exists() {
        log::debug!(
            "No billing sync config at {}, using defaults",
            config_path.display()
        );
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(&config_path)?;
    let config: SyncConfig = serde_json::from_str(&content).map_err(|e| {
        SyncError::Config(format!(
            "Failed to parse {}: {}",
            config_path.display(),
            e
        ))
    })?;

    if !(0.0..1.0).contains(&config.strike_threshold) {
        return Err(SyncError::Config(format!(
            "strikeThreshold must be in [0, 1), got {}",
            config.strike_threshold
        )));
    }

    Ok(config)
}
