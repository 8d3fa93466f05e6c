//! Configuration for taskroot.
//!
//! ## Data directory
//!
//! Everything taskroot writes lives under one directory:
//! - `--data-dir` flag or `TASKROOT_DATA_DIR` environment variable, else
//! - `~/.local/share/taskroot/` (platform data dir)
//!
//! ## config.kdl - User preferences (no secrets)
//!
//! Located at `<data-dir>/config.kdl`. Contains:
//! - `output-format` - "json" or "human"
//! - `port-range` - local port scan range for the tunnel
//! - `command-timeout` - database timeout in seconds
//! - `ssh-port` / `db-port` - hard defaults offered at prompts
//!
//! Secrets never go here; they live in the encrypted vault
//! (see [`crate::vault`]).
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, CredentialDefaults, CredentialOverrides, Resolved, ResolvedConfig,
    ResolvedCredentials, ValueSource, resolve_config, resolve_credentials,
};
#[cfg(unix)]
pub use schema::CONFIG_FILE_MODE;
pub use schema::{AppConfig, OutputFormat};

use crate::{Error, Result};
use kdl::KdlDocument;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that relocates the data directory.
pub const DATA_DIR_ENV: &str = "TASKROOT_DATA_DIR";

pub const CONFIG_FILE: &str = "config.kdl";

/// Resolve the data directory.
///
/// Priority: explicit path (flag or `TASKROOT_DATA_DIR`, both handled by clap)
/// > platform data directory.
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let base = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(base.join("taskroot"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Read config.kdl. A missing file is an empty config; a malformed or
/// invalid one is an error.
pub fn read_config(data_dir: &Path) -> Result<AppConfig> {
    let path = config_path(data_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppConfig::new()),
        Err(e) => return Err(e.into()),
    };
    let doc: KdlDocument = text
        .parse()
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
    let config = AppConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|msg| Error::InvalidInput(format!("{}: {}", path.display(), msg)))?;
    Ok(config)
}

/// Write config.kdl, creating the data directory if needed.
pub fn write_config(data_dir: &Path, config: &AppConfig) -> Result<()> {
    config.validate().map_err(Error::InvalidInput)?;
    fs::create_dir_all(data_dir)?;
    let path = config_path(data_dir);
    fs::write(&path, config.to_kdl().to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(CONFIG_FILE_MODE))?;
    }

    Ok(())
}
