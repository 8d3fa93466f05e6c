//! Unified precedence resolution for configuration and connection credentials.
//!
//! ## Config Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. config.kdl in the data directory
//! 3. Built-in defaults
//!
//! ## Credential Precedence (highest to lowest)
//!
//! 1. Explicit value (CLI flag / env var, or a non-empty prompt answer)
//! 2. Saved session from the vault
//! 3. Hard default
//!
//! An empty prompt answer is not an explicit value: it keeps whatever default
//! was shown, including a remembered password.

use crate::config::{AppConfig, OutputFormat};
use crate::connection::PortRange;
use crate::models::ConnectionCredentials;
use serde::Serialize;

/// Default timeout for database connects and statements, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Value from CLI flag or its environment variable
    CliFlag,
    /// Value typed at an interactive prompt
    Prompt,
    /// Value from the saved session in the vault
    Session,
    /// Value from config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Prompt => write!(f, "prompt"),
            ValueSource::Session => write!(f, "session"),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub output_format: Resolved<OutputFormat>,
    pub port_range: Resolved<PortRange>,
    pub command_timeout: Resolved<u64>,
    pub ssh_port: Resolved<u16>,
    pub db_port: Resolved<u16>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
            port_range: Resolved::new(PortRange::DEFAULT, ValueSource::Default),
            command_timeout: Resolved::new(DEFAULT_COMMAND_TIMEOUT_SECS, ValueSource::Default),
            ssh_port: Resolved::new(DEFAULT_SSH_PORT, ValueSource::Default),
            db_port: Resolved::new(DEFAULT_DB_PORT, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn output_format(&self) -> &OutputFormat {
        &self.output_format.value
    }

    pub fn port_range(&self) -> PortRange {
        self.port_range.value
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout.value)
    }

    /// Hard defaults offered for credential fields.
    pub fn credential_defaults(&self) -> CredentialDefaults {
        CredentialDefaults {
            tunnel_port: self.ssh_port.value,
            db_port: self.db_port.value,
        }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub port_range: Option<PortRange>,
    pub command_timeout: Option<u64>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_port_range(mut self, range: PortRange) -> Self {
        self.port_range = Some(range);
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout = Some(secs);
        self
    }
}

fn pick<T: Clone>(
    explicit: Option<&T>,
    explicit_source: ValueSource,
    stored: Option<&T>,
    stored_source: ValueSource,
    default: T,
) -> Resolved<T> {
    if let Some(value) = explicit {
        Resolved::new(value.clone(), explicit_source)
    } else if let Some(value) = stored {
        Resolved::new(value.clone(), stored_source)
    } else {
        Resolved::new(default, ValueSource::Default)
    }
}

/// Resolve configuration with full precedence chain.
pub fn resolve_config(file: &AppConfig, overrides: &ConfigOverrides) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();
    ResolvedConfig {
        output_format: pick(
            overrides.output_format.as_ref(),
            ValueSource::CliFlag,
            file.output_format.as_ref(),
            ValueSource::ConfigFile,
            defaults.output_format.value,
        ),
        port_range: pick(
            overrides.port_range.as_ref(),
            ValueSource::CliFlag,
            file.port_range.as_ref(),
            ValueSource::ConfigFile,
            defaults.port_range.value,
        ),
        command_timeout: pick(
            overrides.command_timeout.as_ref(),
            ValueSource::CliFlag,
            file.command_timeout.as_ref(),
            ValueSource::ConfigFile,
            defaults.command_timeout.value,
        ),
        ssh_port: pick(
            None,
            ValueSource::CliFlag,
            file.ssh_port.as_ref(),
            ValueSource::ConfigFile,
            defaults.ssh_port.value,
        ),
        db_port: pick(
            None,
            ValueSource::CliFlag,
            file.db_port.as_ref(),
            ValueSource::ConfigFile,
            defaults.db_port.value,
        ),
    }
}

/// Hard defaults for credential fields that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialDefaults {
    pub tunnel_port: u16,
    pub db_port: u16,
}

impl Default for CredentialDefaults {
    fn default() -> Self {
        Self {
            tunnel_port: DEFAULT_SSH_PORT,
            db_port: DEFAULT_DB_PORT,
        }
    }
}

/// Explicit credential values. `None` means "not given, fall back".
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub use_tunnel: Option<bool>,
    pub tunnel_host: Option<String>,
    pub tunnel_port: Option<u16>,
    pub tunnel_user: Option<String>,
    pub tunnel_password: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
}

impl CredentialOverrides {
    /// Check if no explicit value was supplied at all.
    pub fn is_empty(&self) -> bool {
        self.use_tunnel.is_none()
            && self.tunnel_host.is_none()
            && self.tunnel_port.is_none()
            && self.tunnel_user.is_none()
            && self.tunnel_password.is_none()
            && self.db_host.is_none()
            && self.db_port.is_none()
            && self.db_name.is_none()
            && self.db_user.is_none()
            && self.db_password.is_none()
    }
}

/// Connection credentials with a source for every field.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub use_tunnel: Resolved<bool>,
    pub tunnel_host: Resolved<String>,
    pub tunnel_port: Resolved<u16>,
    pub tunnel_user: Resolved<String>,
    pub tunnel_password: Resolved<String>,
    pub db_host: Resolved<String>,
    pub db_port: Resolved<u16>,
    pub db_name: Resolved<String>,
    pub db_user: Resolved<String>,
    pub db_password: Resolved<String>,
}

impl ResolvedCredentials {
    /// The plain record to connect with (and, after success, to save).
    pub fn credentials(&self) -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: self.use_tunnel.value,
            tunnel_host: self.tunnel_host.value.clone(),
            tunnel_port: self.tunnel_port.value,
            tunnel_user: self.tunnel_user.value.clone(),
            tunnel_password: self.tunnel_password.value.clone(),
            db_host: self.db_host.value.clone(),
            db_port: self.db_port.value,
            db_name: self.db_name.value.clone(),
            db_user: self.db_user.value.clone(),
            db_password: self.db_password.value.clone(),
        }
    }

    /// Names of required fields that are still empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.use_tunnel.value {
            if self.tunnel_host.value.is_empty() {
                missing.push("tunnel host");
            }
            if self.tunnel_user.value.is_empty() {
                missing.push("tunnel user");
            }
        }
        if self.db_host.value.is_empty() {
            missing.push("db host");
        }
        if self.db_name.value.is_empty() {
            missing.push("db name");
        }
        if self.db_user.value.is_empty() {
            missing.push("db user");
        }
        missing
    }
}

/// Merge explicit values over a saved session over hard defaults.
///
/// `explicit_source` labels where `overrides` came from (`CliFlag` or `Prompt`).
/// Tunnel fields keep their saved values even when the tunnel is switched
/// off, so switching it back on later offers them again.
pub fn resolve_credentials(
    overrides: &CredentialOverrides,
    explicit_source: ValueSource,
    prior: Option<&ConnectionCredentials>,
    defaults: &CredentialDefaults,
) -> ResolvedCredentials {
    let s = explicit_source;
    ResolvedCredentials {
        use_tunnel: pick(
            overrides.use_tunnel.as_ref(),
            s.clone(),
            prior.map(|p| &p.use_tunnel),
            ValueSource::Session,
            false,
        ),
        tunnel_host: pick(
            overrides.tunnel_host.as_ref(),
            s.clone(),
            prior.map(|p| &p.tunnel_host).filter(|v| !v.is_empty()),
            ValueSource::Session,
            String::new(),
        ),
        tunnel_port: pick(
            overrides.tunnel_port.as_ref(),
            s.clone(),
            prior.map(|p| &p.tunnel_port).filter(|v| **v != 0),
            ValueSource::Session,
            defaults.tunnel_port,
        ),
        tunnel_user: pick(
            overrides.tunnel_user.as_ref(),
            s.clone(),
            prior.map(|p| &p.tunnel_user).filter(|v| !v.is_empty()),
            ValueSource::Session,
            String::new(),
        ),
        tunnel_password: pick(
            overrides.tunnel_password.as_ref(),
            s.clone(),
            prior.map(|p| &p.tunnel_password),
            ValueSource::Session,
            String::new(),
        ),
        db_host: pick(
            overrides.db_host.as_ref(),
            s.clone(),
            prior.map(|p| &p.db_host).filter(|v| !v.is_empty()),
            ValueSource::Session,
            DEFAULT_DB_HOST.to_string(),
        ),
        db_port: pick(
            overrides.db_port.as_ref(),
            s.clone(),
            prior.map(|p| &p.db_port).filter(|v| **v != 0),
            ValueSource::Session,
            defaults.db_port,
        ),
        db_name: pick(
            overrides.db_name.as_ref(),
            s.clone(),
            prior.map(|p| &p.db_name).filter(|v| !v.is_empty()),
            ValueSource::Session,
            String::new(),
        ),
        db_user: pick(
            overrides.db_user.as_ref(),
            s.clone(),
            prior.map(|p| &p.db_user).filter(|v| !v.is_empty()),
            ValueSource::Session,
            String::new(),
        ),
        db_password: pick(
            overrides.db_password.as_ref(),
            s,
            prior.map(|p| &p.db_password),
            ValueSource::Session,
            String::new(),
        ),
    }
}
