//! Configuration file resolution and TOML loading
//!
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config dir>/parlor/<file name>`)
//! 4. None: the caller runs on compiled defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Locate the configuration file for a service
///
/// Returns `None` when no source names an existing file. A path given
/// explicitly (CLI or environment) is returned even if it does not exist so
/// that loading can warn about the missing file.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    let user_config = dirs::config_dir().map(|d| d.join("parlor").join(file_name));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => {
            debug!("No {} found, using compiled defaults", file_name);
            None
        }
    }
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let value = toml::from_str::<T>(&content)?;
    Ok(value)
}

/// Load a TOML file if one was resolved, falling back to `T::default()`
///
/// A resolved file that fails to parse is an error; a missing optional file
/// is not.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) if path.exists() => load_toml(path),
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(T::default())
        }
        None => Ok(T::default()),
    }
}
