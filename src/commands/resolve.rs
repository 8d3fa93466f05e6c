//! `taskroot resolve`: one-shot, non-interactive resolution.

use super::{Output, json};
use crate::config::{CredentialOverrides, ResolvedConfig, ValueSource, resolve_credentials};
use crate::connection::{ConnectSettings, TunnelConnectionManager};
use crate::models::{EntityRef, StartRef};
use crate::resolver::{Resolution, RootTaskResolver};
use crate::shell::parse_reference;
use crate::source::{SnapshotSource, WorkflowSource};
use crate::vault::CredentialVault;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What to resolve: a card link, or an explicit id and discriminator.
#[derive(Debug, Clone)]
pub enum ResolveTarget {
    Link(String),
    Ids { id: i64, discriminator: Uuid },
}

impl ResolveTarget {
    pub fn start_ref(&self) -> Result<StartRef> {
        match self {
            ResolveTarget::Link(link) => parse_reference(link),
            ResolveTarget::Ids { id, discriminator } => Ok(StartRef::new(*id, *discriminator)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub credentials: CredentialOverrides,
    pub snapshot: Option<PathBuf>,
    pub save_session: bool,
}

#[derive(Serialize)]
pub struct ResolveOutput {
    pub start: StartRef,
    pub source: String,
    pub root_task_id: i64,
    pub steps: u32,
    pub path: Vec<EntityRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_saved: Option<bool>,
}

impl ResolveOutput {
    fn new(start: StartRef, source: String, resolution: Resolution) -> Self {
        Self {
            start,
            source,
            root_task_id: resolution.root_task_id,
            steps: resolution.steps,
            path: resolution.path,
            session_saved: None,
        }
    }
}

impl Output for ResolveOutput {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let path = self
            .path
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        let mut lines = vec![
            format!("Root task: {}", self.root_task_id),
            format!("  Start: {}", self.start),
            format!("  Path: {}", path),
            format!("  Steps: {}", self.steps),
            format!("  Source: {}", self.source),
        ];
        match self.session_saved {
            Some(true) => lines.push("  Session saved.".to_string()),
            Some(false) => lines.push("  Session could not be saved (see log).".to_string()),
            None => {}
        }
        lines.join("\n")
    }
}

fn run_resolver<S: WorkflowSource>(source: S, start: StartRef) -> Result<Resolution> {
    RootTaskResolver::new(source).resolve_with(start, &mut |event| {
        tracing::info!(%event, "step");
    })
}

/// Resolve `target` against a snapshot or a live session.
///
/// Live credentials are the explicit overrides merged over the saved
/// session. A corrupt saved session is ignored with a warning.
pub fn resolve(
    data_dir: &Path,
    config: &ResolvedConfig,
    target: &ResolveTarget,
    options: &ResolveOptions,
) -> Result<ResolveOutput> {
    let start = target.start_ref()?;

    if let Some(path) = &options.snapshot {
        let mut source = SnapshotSource::open(path)?;
        let resolution = run_resolver(&mut source, start)?;
        return Ok(ResolveOutput::new(start, source.location(), resolution));
    }

    let vault = CredentialVault::for_current_user(data_dir);
    let prior = vault.load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unusable saved session");
        None
    });
    let resolved = resolve_credentials(
        &options.credentials,
        ValueSource::CliFlag,
        prior.as_ref(),
        &config.credential_defaults(),
    );
    let missing = resolved.missing_fields();
    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Missing connection settings: {}. Pass them as flags or run `taskroot` interactively once.",
            missing.join(", ")
        )));
    }
    let creds = resolved.credentials();
    tracing::debug!(credentials = ?creds, "resolved connection settings");

    let mut manager = TunnelConnectionManager::new(ConnectSettings {
        port_range: config.port_range(),
        timeout: config.command_timeout(),
    });
    let session = manager.open(&creds)?;

    let session_saved = options.save_session.then(|| match vault.save(&creds) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "could not save session");
            false
        }
    });

    let source = session.source()?;
    let location = source.location();
    let outcome = run_resolver(source, start);
    manager.close();

    let mut output = ResolveOutput::new(start, location, outcome?);
    output.session_saved = session_saved;
    Ok(output)
}
