//! Interactive shell.
//!
//! Obtains credentials (saved session or prompts), opens a live session,
//! then reads card links in a loop and resolves each one, printing every
//! step. With a snapshot the connection steps are skipped.

pub mod prompt;
pub mod reference;

pub use prompt::{BufLines, LineReader, Prompter, StdinReader, prompt_credentials};
pub use reference::parse_reference;

use crate::config::{CredentialDefaults, ResolvedConfig};
use crate::connection::{ConnectSettings, TunnelConnectionManager};
use crate::models::{ConnectionCredentials, StartRef};
use crate::resolver::{Resolution, ResolveEvent, RootTaskResolver};
use crate::source::SnapshotSource;
use crate::vault::CredentialVault;
use crate::{Error, Result, error_chain};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How long Ctrl-C waits for the session lock before exiting anyway.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Exit status after Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Resolve callback: start reference plus a progress observer.
pub type ResolveFn<'a> =
    dyn FnMut(StartRef, &mut dyn FnMut(&ResolveEvent)) -> Result<Resolution> + 'a;

pub struct Shell<L, W> {
    prompter: Prompter<L, W>,
    vault: CredentialVault,
}

impl<L: LineReader, W: Write> Shell<L, W> {
    pub fn new(prompter: Prompter<L, W>, vault: CredentialVault) -> Self {
        Self { prompter, vault }
    }

    /// Reuse the saved session or prompt for new credentials.
    ///
    /// A corrupt vault is reported and treated like an absent one.
    pub fn obtain_credentials(
        &mut self,
        defaults: &CredentialDefaults,
    ) -> Result<ConnectionCredentials> {
        let prior = match self.vault.load() {
            Ok(Some(saved)) => {
                self.prompter.say(format!(
                    "Found last session: database {}",
                    saved.db_endpoint()
                ))?;
                if self.prompter.confirm("Connect with the last session?", true)? {
                    return Ok(saved);
                }
                Some(saved)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "saved session unusable");
                self.prompter
                    .say(format!("Warning: saved session is unusable: {}", e))?;
                None
            }
        };
        self.prompt_until_complete(prior.as_ref(), defaults)
    }

    fn prompt_until_complete(
        &mut self,
        prior: Option<&ConnectionCredentials>,
        defaults: &CredentialDefaults,
    ) -> Result<ConnectionCredentials> {
        let mut prior = prior.cloned();
        loop {
            let resolved = prompt_credentials(&mut self.prompter, prior.as_ref(), defaults)?;
            let missing = resolved.missing_fields();
            if missing.is_empty() {
                return Ok(resolved.credentials());
            }
            self.prompter
                .say(format!("Missing: {}", missing.join(", ")))?;
            // offer what was typed so far as the defaults for the next round
            prior = Some(resolved.credentials());
        }
    }

    /// Open a session, offering to re-enter credentials after each failure.
    ///
    /// Returns the credentials that connected.
    pub fn connect(
        &mut self,
        manager: &Mutex<TunnelConnectionManager>,
        mut creds: ConnectionCredentials,
        defaults: &CredentialDefaults,
    ) -> Result<ConnectionCredentials> {
        loop {
            if creds.use_tunnel {
                self.prompter
                    .say(format!("Opening tunnel to {}...", creds.tunnel_endpoint()))?;
            }
            self.prompter
                .say(format!("Connecting to database {}...", creds.db_endpoint()))?;

            let opened = lock(manager)?.open(&creds).map(|session| session.local_port());
            match opened {
                Ok(local_port) => {
                    if let Some(port) = local_port {
                        self.prompter.say(format!(
                            "Tunnel: 127.0.0.1:{} -> {}",
                            port,
                            creds.db_endpoint()
                        ))?;
                    }
                    self.prompter.say("Connected.")?;
                    return Ok(creds);
                }
                Err(e) => {
                    self.prompter
                        .say(format!("Connection failed: {}", error_chain(&e)))?;
                    if !self
                        .prompter
                        .confirm("Re-enter connection details?", true)?
                    {
                        return Err(e);
                    }
                    creds = self.prompt_until_complete(Some(&creds), defaults)?;
                }
            }
        }
    }

    /// Save credentials that produced a working session. Failures only warn.
    pub fn remember(&mut self, creds: &ConnectionCredentials) -> Result<()> {
        match self.vault.save(creds) {
            Ok(()) => {
                self.prompter.say(format!(
                    "Connection details saved, encrypted for this account: {}",
                    self.vault.path().display()
                ))?;
                self.prompter
                    .say("Type 'clear' at the link prompt to forget them.")?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not save session");
                self.prompter
                    .say(format!("Warning: could not save session: {}", e))?;
            }
        }
        Ok(())
    }

    /// Read links and resolve them until `exit`, an empty line or end of input.
    pub fn reference_loop(&mut self, resolve: &mut ResolveFn<'_>) -> Result<()> {
        loop {
            self.prompter.say(
                "\nEnter a task or assignment link ('exit' to quit, 'clear' to forget the saved session):",
            )?;
            let Some(line) = self.prompter.line("> ")? else {
                break;
            };
            match line.to_lowercase().as_str() {
                "" | "exit" | "quit" => break,
                "clear" => {
                    self.clear_session()?;
                    continue;
                }
                _ => {}
            }

            let start = match parse_reference(&line) {
                Ok(start) => start,
                Err(e) => {
                    self.prompter.say(format!("Warning: {}", e))?;
                    continue;
                }
            };

            let out = self.prompter.output();
            let outcome = resolve(start, &mut |event| {
                let _ = writeln!(out, "{}", event);
            });
            match outcome {
                Ok(resolution) => self
                    .prompter
                    .say(format!("Root task: {}", resolution.root_task_id))?,
                // already reported through the Failed event
                Err(Error::Unresolved(_)) => {}
                Err(e) => self
                    .prompter
                    .say(format!("Error: {}", error_chain(&e)))?,
            }
        }
        Ok(())
    }

    fn clear_session(&mut self) -> Result<()> {
        match self.vault.clear() {
            Ok(true) => self
                .prompter
                .say("Saved session cleared. Next start will ask for connection details.")?,
            Ok(false) => self.prompter.say("No saved session.")?,
            Err(e) => self
                .prompter
                .say(format!("Warning: could not clear session: {}", e))?,
        }
        Ok(())
    }
}

fn lock(
    manager: &Mutex<TunnelConnectionManager>,
) -> Result<MutexGuard<'_, TunnelConnectionManager>> {
    manager
        .lock()
        .map_err(|_| Error::Other("Connection manager lock poisoned".to_string()))
}

/// Close the live session on Ctrl-C, then exit.
fn install_interrupt_handler(manager: Arc<Mutex<TunnelConnectionManager>>) {
    let installed = ctrlc::set_handler(move || {
        let deadline = std::time::Instant::now() + INTERRUPT_GRACE;
        loop {
            if let Ok(mut guard) = manager.try_lock() {
                guard.close();
                break;
            }
            if std::time::Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        // exit() skips the echo guard held by a pending password read.
        crate::sys::restore_terminal();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    });
    if let Err(e) = installed {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
}

/// Run the interactive shell on stdin/stdout.
pub fn run(data_dir: &Path, config: &ResolvedConfig, snapshot: Option<&Path>) -> Result<()> {
    let vault = CredentialVault::for_current_user(data_dir);
    let mut shell = Shell::new(Prompter::stdio(), vault);
    shell.prompter.say("taskroot: root task finder\n")?;

    if let Some(path) = snapshot {
        let mut source = SnapshotSource::open(path)?;
        shell
            .prompter
            .say(format!("Using snapshot {}", path.display()))?;
        return shell.reference_loop(&mut |start, observer| {
            RootTaskResolver::new(&mut source).resolve_with(start, observer)
        });
    }

    let defaults = config.credential_defaults();
    let manager = Arc::new(Mutex::new(TunnelConnectionManager::new(ConnectSettings {
        port_range: config.port_range(),
        timeout: config.command_timeout(),
    })));
    install_interrupt_handler(Arc::clone(&manager));
    let _close = SessionGuard(&manager);

    let creds = shell.obtain_credentials(&defaults)?;
    let creds = shell.connect(&manager, creds, &defaults)?;
    serve_session(&mut shell, &manager, &creds)
}

/// Closes the managed session when dropped, on every way out of the shell.
struct SessionGuard<'a>(&'a Mutex<TunnelConnectionManager>);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        match self.0.lock() {
            Ok(mut manager) => manager.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }
}

/// Remember the credentials that connected, then resolve links over the
/// open session until the user leaves. The session is closed afterwards.
fn serve_session<L: LineReader, W: Write>(
    shell: &mut Shell<L, W>,
    manager: &Mutex<TunnelConnectionManager>,
    creds: &ConnectionCredentials,
) -> Result<()> {
    let _close = SessionGuard(manager);
    shell.remember(creds)?;
    shell.reference_loop(&mut |start, observer| {
        let mut guard = lock(manager)?;
        let session = guard
            .session()
            .ok_or_else(|| Error::Other("No open session".to_string()))?;
        RootTaskResolver::new(session.source()?).resolve_with(start, observer)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use uuid::Uuid;

    type TestShell<'a> = Shell<BufLines<&'a [u8]>, Vec<u8>>;

    fn shell<'a>(env: &TestEnv, script: &'a str) -> TestShell<'a> {
        Shell::new(
            Prompter::new(BufLines(script.as_bytes()), Vec::new()),
            env.vault_for(1000, "alice"),
        )
    }

    fn printed(shell: &mut TestShell<'_>) -> String {
        String::from_utf8(shell.prompter.output().clone()).unwrap()
    }

    fn saved() -> ConnectionCredentials {
        ConnectionCredentials {
            db_host: "db".to_string(),
            db_port: 5432,
            db_name: "wf".to_string(),
            db_user: "reader".to_string(),
            db_password: "pw".to_string(),
            ..Default::default()
        }
    }

    fn root_at(
        id: i64,
    ) -> impl FnMut(StartRef, &mut dyn FnMut(&ResolveEvent)) -> Result<Resolution> {
        move |start, observer| {
            observer(&ResolveEvent::Started { start });
            observer(&ResolveEvent::RootFound {
                root_task_id: id,
                steps: 1,
            });
            Ok(Resolution {
                root_task_id: id,
                steps: 1,
                path: Vec::new(),
            })
        }
    }

    #[test]
    fn test_obtain_credentials_reuses_saved_session() {
        let env = TestEnv::new();
        env.vault_for(1000, "alice").save(&saved()).unwrap();
        let mut shell = shell(&env, "\n");

        let creds = shell.obtain_credentials(&CredentialDefaults::default()).unwrap();

        assert_eq!(creds, saved());
        assert!(printed(&mut shell).contains("Found last session: database db:5432"));
    }

    #[test]
    fn test_obtain_credentials_declined_prompts_with_saved_defaults() {
        let env = TestEnv::new();
        env.vault_for(1000, "alice").save(&saved()).unwrap();
        // decline, tunnel? no, then keep every shown default except the db name
        let mut shell = shell(&env, "no\nno\n\n\nother\n\n\n");

        let creds = shell.obtain_credentials(&CredentialDefaults::default()).unwrap();

        assert_eq!(creds.db_name, "other");
        assert_eq!(creds.db_password, "pw");
    }

    #[test]
    fn test_obtain_credentials_corrupt_vault_warns_and_prompts() {
        let env = TestEnv::new();
        let vault = env.vault_for(1000, "alice");
        vault.save(&saved()).unwrap();
        std::fs::write(vault.path(), b"garbage").unwrap();
        let mut shell = shell(&env, "no\n\n\nwf\nreader\npw\n");

        let creds = shell.obtain_credentials(&CredentialDefaults::default()).unwrap();

        assert_eq!(creds.db_host, "localhost");
        assert!(printed(&mut shell).contains("saved session is unusable"));
    }

    #[test]
    fn test_obtain_credentials_reasks_until_required_fields_present() {
        let env = TestEnv::new();
        // first round leaves db name empty, second fills it
        let mut shell = shell(&env, "no\n\n\n\nreader\npw\nno\n\n\nwf\n\n\n");

        let creds = shell.obtain_credentials(&CredentialDefaults::default()).unwrap();

        assert_eq!(creds.db_name, "wf");
        assert_eq!(creds.db_user, "reader");
        assert!(printed(&mut shell).contains("Missing: db name"));
    }

    #[test]
    fn test_connect_failure_without_retry_returns_error() {
        let env = TestEnv::new();
        let port = std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut creds = saved();
        creds.db_host = "127.0.0.1".to_string();
        creds.db_port = port;
        let manager = Mutex::new(TunnelConnectionManager::new(ConnectSettings {
            timeout: Duration::from_secs(2),
            ..Default::default()
        }));
        let mut shell = shell(&env, "no\n");

        let err = shell
            .connect(&manager, creds, &CredentialDefaults::default())
            .unwrap_err();

        assert!(matches!(err, Error::Connect(_)));
        assert!(printed(&mut shell).contains("Connection failed"));
    }

    #[test]
    fn test_remember_saves_to_vault() {
        let env = TestEnv::new();
        let mut shell = shell(&env, "");
        shell.remember(&saved()).unwrap();
        assert_eq!(env.vault_for(1000, "alice").load().unwrap(), Some(saved()));
    }

    #[test]
    fn test_reference_loop_resolves_and_exits() {
        let env = TestEnv::new();
        let d = Uuid::from_u128(1);
        let script = format!("https://rx/card/{d}/1001\nexit\n");
        let mut shell = shell(&env, &script);

        shell.reference_loop(&mut root_at(3003)).unwrap();

        let out = printed(&mut shell);
        assert!(out.contains("Resolving 1001"));
        assert!(out.contains("Root task: 3003"));
    }

    #[test]
    fn test_reference_loop_warns_on_bad_link_and_continues() {
        let env = TestEnv::new();
        let d = Uuid::from_u128(1);
        let script = format!("not a link\nhttps://rx/card/{d}/7\n");
        let mut shell = shell(&env, &script);

        shell.reference_loop(&mut root_at(7)).unwrap();

        let out = printed(&mut shell);
        assert!(out.contains("Warning:"));
        assert!(out.contains("Root task: 7"));
    }

    #[test]
    fn test_reference_loop_clear_removes_saved_session() {
        let env = TestEnv::new();
        env.vault_for(1000, "alice").save(&saved()).unwrap();
        let mut shell = shell(&env, "clear\nclear\n\n");

        shell.reference_loop(&mut root_at(1)).unwrap();

        let out = printed(&mut shell);
        assert!(out.contains("Saved session cleared"));
        assert!(out.contains("No saved session."));
        assert!(!env.vault_for(1000, "alice").exists());
    }

    #[test]
    fn test_reference_loop_reports_lookup_errors_and_continues() {
        let env = TestEnv::new();
        let d = Uuid::from_u128(1);
        let script = format!("https://rx/card/{d}/1\nhttps://rx/card/{d}/2\n");
        let mut shell = shell(&env, &script);
        let mut calls = 0;

        shell
            .reference_loop(&mut |_, _| {
                calls += 1;
                Err(Error::Other("connection reset".to_string()))
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert!(printed(&mut shell).contains("Error: connection reset"));
    }

    struct BrokenStdout;

    impl Write for BrokenStdout {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_serve_session_closes_when_remember_fails() {
        let env = TestEnv::new();
        let manager = Mutex::new(TunnelConnectionManager::with_idle_session("db:5432"));
        let mut shell = Shell::new(
            Prompter::new(BufLines("exit\n".as_bytes()), BrokenStdout),
            env.vault_for(1000, "alice"),
        );

        let result = serve_session(&mut shell, &manager, &saved());

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!manager.lock().unwrap().has_session());
    }

    #[test]
    fn test_serve_session_closes_after_exit() {
        let env = TestEnv::new();
        let d = Uuid::from_u128(1);
        let manager = Mutex::new(TunnelConnectionManager::with_idle_session("db:5432"));
        let script = format!("https://rx/card/{d}/1\nexit\n");
        let mut shell = shell(&env, &script);

        serve_session(&mut shell, &manager, &saved()).unwrap();

        assert!(printed(&mut shell).contains("Error: Database session is closed"));
        assert!(!manager.lock().unwrap().has_session());
        assert_eq!(env.vault_for(1000, "alice").load().unwrap(), Some(saved()));
    }
}
