//! Cross-Platform Path Utilities
//!
//! Resolves where the settings file lives.

use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "chamado-agent";

/// Settings file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the platform config directory (e.g. `~/.config` on Linux)
pub fn config_dir() -> AppResult<PathBuf> {
    dirs::config_dir().ok_or_else(|| AppError::config("Could not determine config directory"))
}

/// Get the application config directory (`<config dir>/chamado-agent/`)
pub fn app_config_dir() -> AppResult<PathBuf> {
    Ok(config_dir()?.join(APP_DIR_NAME))
}

/// Get the default settings file path (`<config dir>/chamado-agent/config.toml`)
pub fn default_config_path() -> AppResult<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}
