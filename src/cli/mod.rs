//! CLI argument definitions for taskroot.

use crate::commands::ResolveTarget;
use crate::config::CredentialOverrides;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// taskroot - find the root task that owns a workflow assignment or task.
///
/// Run without a subcommand for the interactive shell: it asks for (or
/// reuses) connection details, then resolves card links one by one.
#[derive(Parser, Debug)]
#[command(name = "taskroot")]
#[command(author, version, long_version = crate::cli::LONG_VERSION, about, long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Directory for config.kdl, the saved session and logs
    #[arg(long = "data-dir", global = true, env = "TASKROOT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Resolve against a SQLite snapshot of the workflow tables instead of a live database
    #[arg(long, global = true, env = "TASKROOT_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Local port range for the tunnel forward, e.g. 54321-54400
    #[arg(long = "port-range", global = true)]
    pub port_range: Option<String>,

    /// Database connect and statement timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub command_timeout: Option<u64>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Version string with build metadata from build.rs.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("TASKROOT_GIT_COMMIT"),
    "\nbuilt: ",
    env!("TASKROOT_BUILD_TIMESTAMP"),
);

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve one reference to its root task
    ///
    /// Give a card link, or --id with --discriminator. Connection settings
    /// come from flags/environment merged over the saved session.
    Resolve {
        /// Card link ending in /card/<discriminator>/.../<id>
        #[arg(required_unless_present = "id", conflicts_with_all = ["id", "discriminator"])]
        link: Option<String>,

        /// Record id
        #[arg(long, requires = "discriminator")]
        id: Option<i64>,

        /// Record type discriminator (UUID)
        #[arg(long, requires = "id")]
        discriminator: Option<Uuid>,

        /// Save the connection settings after a successful connect
        #[arg(long)]
        save_session: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Saved session commands
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Connection settings for non-interactive use.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Connect through an SSH tunnel
    #[arg(long, overrides_with = "no_tunnel")]
    pub tunnel: bool,

    /// Connect directly, ignoring a saved tunnel
    #[arg(long = "no-tunnel")]
    pub no_tunnel: bool,

    /// SSH host
    #[arg(long, env = "TASKROOT_SSH_HOST")]
    pub ssh_host: Option<String>,

    /// SSH port
    #[arg(long, env = "TASKROOT_SSH_PORT")]
    pub ssh_port: Option<u16>,

    /// SSH user
    #[arg(long, env = "TASKROOT_SSH_USER")]
    pub ssh_user: Option<String>,

    /// SSH password
    #[arg(long, env = "TASKROOT_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// Database host (as seen from the tunnel host when tunneling)
    #[arg(long, env = "TASKROOT_DB_HOST")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long, env = "TASKROOT_DB_PORT")]
    pub db_port: Option<u16>,

    /// Database name
    #[arg(long, env = "TASKROOT_DB_NAME")]
    pub db_name: Option<String>,

    /// Database user
    #[arg(long, env = "TASKROOT_DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "TASKROOT_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,
}

impl ConnectionArgs {
    pub fn overrides(&self) -> CredentialOverrides {
        let use_tunnel = if self.tunnel {
            Some(true)
        } else if self.no_tunnel {
            Some(false)
        } else {
            None
        };
        CredentialOverrides {
            use_tunnel,
            tunnel_host: self.ssh_host.clone(),
            tunnel_port: self.ssh_port,
            tunnel_user: self.ssh_user.clone(),
            tunnel_password: self.ssh_password.clone(),
            db_host: self.db_host.clone(),
            db_port: self.db_port,
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
        }
    }
}

/// Build the resolve target from the mutually exclusive arguments.
pub fn resolve_target(
    link: Option<String>,
    id: Option<i64>,
    discriminator: Option<Uuid>,
) -> Option<ResolveTarget> {
    match (link, id, discriminator) {
        (Some(link), _, _) => Some(ResolveTarget::Link(link)),
        (None, Some(id), Some(discriminator)) => Some(ResolveTarget::Ids { id, discriminator }),
        _ => None,
    }
}

/// Saved session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Show the saved session (passwords masked)
    Show,

    /// Delete the saved session
    Clear,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Set a configuration value in config.kdl
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}
