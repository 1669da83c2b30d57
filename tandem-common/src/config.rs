//! Configuration file resolution and TOML loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<platform config dir>/tandem/<file name>` if it exists
//! 4. No file: the caller runs on compiled defaults
//!
//! A missing file never terminates the process; a file that exists but does not
//! parse does.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name under the platform configuration directory
pub const CONFIG_DIR_NAME: &str = "tandem";

/// Resolve which configuration file to load, if any.
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
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let candidate = default_config_dir()?.join(file_name);
    if candidate.exists() {
        return Some(candidate);
    }

    // Priority 4: compiled defaults
    None
}

/// Platform configuration directory for Tandem (e.g. `~/.config/tandem` on Linux)
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME))
}

/// Load a TOML configuration file, falling back to `T::default()` when there is
/// no file to load.
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Configuration file {} does not exist, using compiled defaults",
            path.display()
        );
        return Ok(T::default());
    }

    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_toml(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Parse configuration from a TOML string
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}
