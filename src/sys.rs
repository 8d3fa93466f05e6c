//! System utilities for OS account identity and terminal handling.

use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
#[cfg(unix)]
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(unix)]
use nix::sys::termios::Termios;

/// Locations checked, in order, for a stable per-machine identifier.
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// The local account the process runs as.
///
/// The vault key is bound to this value, so a credential file copied to
/// another account or another machine no longer decrypts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Real UID of the process (0 on platforms without UIDs)
    pub uid: u32,
    /// Login name of that UID
    pub username: String,
    /// Stable identifier of this machine
    pub machine_id: String,
}

impl UserIdentity {
    /// Bytes fed into vault key derivation. Fields are length-prefixed so
    /// distinct identities can never serialize to the same bytes.
    pub fn key_material(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.uid.to_le_bytes());
        for part in [&self.username, &self.machine_id] {
            out.extend_from_slice(&(part.len() as u32).to_le_bytes());
            out.extend_from_slice(part.as_bytes());
        }
        out
    }
}

/// Detects the identity of the account running this process.
///
/// The user name comes from the password database for the real UID, falling
/// back to `$USER` when the UID has no entry (e.g. in minimal containers).
#[cfg(unix)]
pub fn current_identity() -> UserIdentity {
    use nix::unistd::{User, getuid};

    let uid = getuid();
    let username = User::from_uid(uid)
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| format!("uid-{}", uid.as_raw()));

    UserIdentity {
        uid: uid.as_raw(),
        username,
        machine_id: machine_id(),
    }
}

#[cfg(not(unix))]
pub fn current_identity() -> UserIdentity {
    let username = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string());

    UserIdentity {
        uid: 0,
        username,
        machine_id: machine_id(),
    }
}

fn machine_id() -> String {
    for path in MACHINE_ID_PATHS {
        if let Ok(contents) = fs::read_to_string(path) {
            let id = contents.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    hostname().unwrap_or_else(|| "unknown-machine".to_string())
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// Terminal settings in force before echo was turned off, for
/// [`restore_terminal`] to put back when the process is interrupted.
#[cfg(unix)]
static SAVED_TERMINAL: Mutex<Option<Termios>> = Mutex::new(None);

#[cfg(unix)]
fn saved_terminal() -> MutexGuard<'static, Option<Termios>> {
    SAVED_TERMINAL
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Restores terminal echo when dropped.
#[cfg(unix)]
struct EchoGuard {
    original: Termios,
}

#[cfg(unix)]
impl EchoGuard {
    fn disable() -> Option<Self> {
        use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};

        let stdin = io::stdin();
        let original = tcgetattr(&stdin).ok()?;
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        *saved_terminal() = Some(original.clone());
        if tcsetattr(&stdin, SetArg::TCSANOW, &silent).is_err() {
            saved_terminal().take();
            return None;
        }
        Some(Self { original })
    }
}

#[cfg(unix)]
impl Drop for EchoGuard {
    fn drop(&mut self) {
        use nix::sys::termios::{SetArg, tcsetattr};
        saved_terminal().take();
        let _ = tcsetattr(&io::stdin(), SetArg::TCSANOW, &self.original);
    }
}

/// Put back terminal settings changed by [`read_secret_line`].
///
/// For exit paths that skip destructors, such as the Ctrl-C handler.
/// Returns whether anything was restored.
#[cfg(unix)]
pub fn restore_terminal() -> bool {
    use nix::sys::termios::{SetArg, tcsetattr};

    let Some(original) = saved_terminal().take() else {
        return false;
    };
    tcsetattr(&io::stdin(), SetArg::TCSANOW, &original).is_ok()
}

#[cfg(not(unix))]
pub fn restore_terminal() -> bool {
    false
}

/// Read one line from stdin without echoing it.
///
/// Falls back to a plain read when stdin is not a terminal (piped input).
/// Returns `None` on end of input.
pub fn read_secret_line() -> io::Result<Option<String>> {
    #[cfg(unix)]
    let _guard = if io::stdin().is_terminal() {
        EchoGuard::disable()
    } else {
        None
    };

    io::stdout().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
