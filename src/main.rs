//! taskroot CLI - find the root task that owns a workflow assignment or task.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use taskroot::cli::{Cli, Commands, ConfigCommands, SessionCommands, resolve_target};
use taskroot::commands::{self, Output, ResolveOptions};
use taskroot::config::{self, ConfigOverrides, OutputFormat, ResolvedConfig};
use taskroot::{Error, Result, error_chain, shell};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `taskroot=debug`.
const LOG_ENV: &str = "TASKROOT_LOG";
const LOG_FILE: &str = "taskroot.log";

fn main() {
    let cli = Cli::parse();

    let data_dir = match config::data_dir(cli.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => fail(&e, cli.human_readable),
    };

    let interactive = cli.command.is_none();
    let _log_guard = init_logging(&data_dir, cli.verbose, interactive);

    let overrides = match config_overrides(&cli) {
        Ok(overrides) => overrides,
        Err(e) => fail(&e, cli.human_readable),
    };
    let resolved = match load_config(&data_dir, &overrides) {
        Ok(resolved) => resolved,
        Err(e) => fail(&e, cli.human_readable),
    };
    let human = cli.human_readable || *resolved.output_format() == OutputFormat::Human;

    tracing::debug!(data_dir = %data_dir.display(), interactive, "starting");

    let result = run_command(cli, &data_dir, &overrides, &resolved, human);
    if let Err(e) = result {
        fail(&e, human);
    }
}

/// Route tracing output. Commands log to stderr; the interactive shell
/// logs to `<data-dir>/taskroot.log` unless `-v` asks for stderr.
fn init_logging(data_dir: &Path, verbose: bool, interactive: bool) -> Option<WorkerGuard> {
    let level = if verbose { "taskroot=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    if interactive && !verbose && std::fs::create_dir_all(data_dir).is_ok() {
        let appender = tracing_appender::rolling::never(data_dir, LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        return installed.ok().map(|_| guard);
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    None
}

fn config_overrides(cli: &Cli) -> Result<ConfigOverrides> {
    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    if let Some(range) = &cli.port_range {
        let range = commands::config::parse_port_range(range)?;
        if range.is_empty() {
            return Err(Error::InvalidInput(format!("Empty port range {}", range)));
        }
        overrides = overrides.with_port_range(range);
    }
    if let Some(secs) = cli.command_timeout {
        if secs == 0 {
            return Err(Error::InvalidInput(
                "--timeout must be at least 1 second".to_string(),
            ));
        }
        overrides = overrides.with_command_timeout(secs);
    }
    Ok(overrides)
}

fn load_config(data_dir: &Path, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let file = config::read_config(data_dir)?;
    Ok(config::resolve_config(&file, overrides))
}

fn run_command(
    cli: Cli,
    data_dir: &Path,
    overrides: &ConfigOverrides,
    resolved: &ResolvedConfig,
    human: bool,
) -> Result<()> {
    let snapshot: Option<PathBuf> = cli.snapshot;
    match cli.command {
        None => shell::run(data_dir, resolved, snapshot.as_deref())?,

        Some(Commands::Resolve {
            link,
            id,
            discriminator,
            save_session,
            connection,
        }) => {
            let target = resolve_target(link, id, discriminator).ok_or_else(|| {
                Error::InvalidInput("Give a card link or --id with --discriminator".to_string())
            })?;
            let options = ResolveOptions {
                credentials: connection.overrides(),
                snapshot,
                save_session,
            };
            let result = commands::resolve(data_dir, resolved, &target, &options)?;
            output(&result, human);
        }

        Some(Commands::Session { command }) => match command {
            SessionCommands::Show => {
                let result = commands::session_show(data_dir)?;
                output(&result, human);
            }
            SessionCommands::Clear => {
                let result = commands::session_clear(data_dir)?;
                output(&result, human);
            }
        },

        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(data_dir, overrides)?;
                output(&result, human);
            }
            ConfigCommands::Get { key } => {
                let result = commands::config_get(data_dir, overrides, &key)?;
                output(&result, human);
            }
            ConfigCommands::Set { key, value } => {
                let result = commands::config_set(data_dir, &key, &value)?;
                output(&result, human);
            }
        },
    }
    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Report `err` on stderr and exit with status 1.
fn fail(err: &Error, human: bool) -> ! {
    let message = error_chain(err);
    if human {
        eprintln!("Error: {}", message);
    } else {
        eprintln!(
            "{}",
            serde_json::json!({ "error": message, "kind": err.kind() })
        );
    }
    process::exit(1);
}
