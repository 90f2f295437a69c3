//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the Discorator base directory (~/.discorator).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".discorator"))
}

/// Get the main config file path (~/.discorator/discorator.json5).
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(base_dir()?.join("discorator.json5"))
}
