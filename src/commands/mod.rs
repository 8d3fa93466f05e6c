//! Command implementations for the taskroot CLI.
//!
//! Each command returns a result type implementing [`Output`], which `main`
//! prints as JSON (default) or human-readable text (`-H`).
//! - `resolve` - resolve one reference to its root task
//! - `session` - inspect or clear the saved connection session
//! - `config` - show, get and set preferences in config.kdl

pub mod config;
pub mod resolve;
pub mod session;

pub use config::{ConfigGet, ConfigSet, ConfigShow, config_get, config_set, config_show};
pub use resolve::{ResolveOptions, ResolveOutput, ResolveTarget, resolve};
pub use session::{SessionCleared, SessionShow, session_clear, session_show};

use serde::Serialize;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Shared JSON rendering for serializable results.
pub(crate) fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}
