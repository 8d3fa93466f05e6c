//! taskroot - find the root task that owns a workflow assignment or task.
//!
//! This library provides the core functionality for the `taskroot` CLI tool:
//! the root-task traversal, the tunnel/database session lifecycle, and the
//! user-scoped encrypted credential vault.

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod models;
pub mod resolver;
pub mod shell;
pub mod source;
pub mod sys;
pub mod vault;

pub use connection::ConnectError;
pub use resolver::ResolutionError;
pub use vault::VaultError;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;
    use tempfile::TempDir;

    use crate::sys::UserIdentity;
    use crate::vault::CredentialVault;

    /// Test environment with an isolated data directory.
    pub struct TestEnv {
        pub data_dir: TempDir,
    }

    impl TestEnv {
        pub fn new() -> Self {
            Self {
                data_dir: TempDir::new().unwrap(),
            }
        }

        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// A fixed identity so tests never depend on the account running them.
        pub fn identity(uid: u32, name: &str) -> UserIdentity {
            UserIdentity {
                uid,
                username: name.to_string(),
                machine_id: "test-machine".to_string(),
            }
        }

        pub fn vault_for(&self, uid: u32, name: &str) -> CredentialVault {
            CredentialVault::new(self.data_path(), Self::identity(uid, name))
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Library-level error type for taskroot operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] rusqlite::Error),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Unresolved(#[from] ResolutionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable category for JSON error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Database(_) => "database",
            Error::Snapshot(_) => "snapshot",
            Error::Connect(e) => e.kind(),
            Error::Vault(VaultError::Corrupt(_)) => "vault_corrupt",
            Error::Vault(VaultError::Io(_)) => "vault_io",
            Error::Unresolved(e) => e.kind(),
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Other(_) => "other",
        }
    }
}

/// Result type alias for taskroot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an error together with its source chain, one cause per clause.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
