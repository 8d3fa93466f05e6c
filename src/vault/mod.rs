//! Encrypted local cache of the last working connection parameters.
//!
//! Files live in `<data-dir>/session/`:
//! - `credentials.dat` - the sealed `ConnectionCredentials` record
//! - `vault.key` - 32 random bytes (base64), created on first save
//!
//! The encryption key is derived from `vault.key` together with the current
//! account identity (see [`crate::sys::UserIdentity`]), so the blob is
//! unreadable from another account or another machine even if both files
//! are copied.
//!
//! ## Security
//!
//! Both files are written atomically with 0600 permissions, and the
//! `session/` directory is created with 0700.

mod cipher;

use crate::models::ConnectionCredentials;
use crate::sys::{UserIdentity, current_identity};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Required permissions for the vault files (Unix: owner read/write only).
#[cfg(unix)]
pub const VAULT_FILE_MODE: u32 = 0o600;

/// Required permissions for the session directory.
#[cfg(unix)]
pub const VAULT_DIR_MODE: u32 = 0o700;

pub const SESSION_DIR: &str = "session";
pub const CREDENTIALS_FILE: &str = "credentials.dat";
pub const KEY_FILE: &str = "vault.key";

/// Why a stored blob could not be turned back into credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Shorter than the envelope header
    Truncated,
    /// Not a taskroot vault file
    BadHeader,
    /// Key file missing or malformed
    KeyFile,
    /// Authentication failed: wrong account, wrong machine, or tampered file
    Decrypt,
    /// Decrypted, but not a credential record
    Payload,
}

impl CorruptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptReason::Truncated => "truncated",
            CorruptReason::BadHeader => "bad_header",
            CorruptReason::KeyFile => "key_file",
            CorruptReason::Decrypt => "decrypt",
            CorruptReason::Payload => "payload",
        }
    }
}

impl std::fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CorruptReason::Truncated => "file is truncated",
            CorruptReason::BadHeader => "not a taskroot vault file",
            CorruptReason::KeyFile => "vault key file is missing or malformed",
            CorruptReason::Decrypt => {
                "cannot decrypt (saved under another account or machine, or modified)"
            }
            CorruptReason::Payload => "decrypted payload is not a credential record",
        };
        write!(f, "{}", text)
    }
}

/// Vault failures. None of these are fatal to a running session.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Saved session is corrupt: {0}")]
    Corrupt(CorruptReason),

    #[error("Vault IO error: {0}")]
    Io(#[from] io::Error),
}

enum KeySecret {
    Present([u8; cipher::KEY_LEN]),
    Missing,
    Malformed,
}

/// User-scoped encrypted credential store.
#[derive(Debug, Clone)]
pub struct CredentialVault {
    dir: PathBuf,
    identity: UserIdentity,
}

impl CredentialVault {
    /// Vault rooted at `<data_dir>/session`, bound to the given identity.
    pub fn new(data_dir: &Path, identity: UserIdentity) -> Self {
        Self {
            dir: data_dir.join(SESSION_DIR),
            identity,
        }
    }

    /// Vault bound to the account running this process.
    pub fn for_current_user(data_dir: &Path) -> Self {
        Self::new(data_dir, current_identity())
    }

    /// Path of the encrypted credential blob.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    /// Check if a credential blob is present, without reading it.
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Last modification time of the blob, if present.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        fs::metadata(self.path())
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    /// Load the saved credentials.
    ///
    /// # Returns
    /// * `Ok(Some(creds))` if a blob exists and decrypts under this identity
    /// * `Ok(None)` if no blob exists
    /// * `Err(VaultError::Corrupt(_))` if a blob exists but cannot be used
    /// * `Err(VaultError::Io(_))` if the blob exists but cannot be read
    pub fn load(&self) -> Result<Option<ConnectionCredentials>, VaultError> {
        let envelope = match fs::read(self.path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let secret = match self.read_key_file()? {
            KeySecret::Present(secret) => secret,
            KeySecret::Missing | KeySecret::Malformed => {
                return Err(VaultError::Corrupt(CorruptReason::KeyFile));
            }
        };

        let key = cipher::derive_key(&secret, &self.identity);
        let plaintext = cipher::open(&key, &envelope).map_err(VaultError::Corrupt)?;
        let creds = serde_json::from_slice(&plaintext)
            .map_err(|_| VaultError::Corrupt(CorruptReason::Payload))?;

        tracing::debug!(path = %self.path().display(), "loaded saved session");
        Ok(Some(creds))
    }

    /// Encrypt and store the given credentials, replacing any previous blob.
    ///
    /// Only call this with the exact record that produced a working
    /// connection, so that a later `load` reproduces that session.
    pub fn save(&self, creds: &ConnectionCredentials) -> Result<(), VaultError> {
        self.ensure_dir()?;

        let secret = match self.read_key_file()? {
            KeySecret::Present(secret) => secret,
            // A malformed key cannot decrypt anything; replace it.
            KeySecret::Missing | KeySecret::Malformed => self.create_key_file()?,
        };

        let key = cipher::derive_key(&secret, &self.identity);
        let plaintext = serde_json::to_vec(creds).map_err(io::Error::from)?;
        let envelope = cipher::seal(&key, &plaintext)?;
        write_private(&self.path(), &envelope)?;

        tracing::debug!(path = %self.path().display(), "saved session");
        Ok(())
    }

    /// Delete the stored blob.
    ///
    /// Returns `true` if a blob was removed, `false` if there was none.
    pub fn clear(&self) -> Result<bool, VaultError> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(VAULT_DIR_MODE))?;
        }
        Ok(())
    }

    fn read_key_file(&self) -> io::Result<KeySecret> {
        let text = match fs::read_to_string(self.key_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KeySecret::Missing),
            Err(e) => return Err(e),
        };
        let secret = STANDARD
            .decode(text.trim())
            .ok()
            .and_then(|bytes| <[u8; cipher::KEY_LEN]>::try_from(bytes).ok());
        Ok(secret.map_or(KeySecret::Malformed, KeySecret::Present))
    }

    fn create_key_file(&self) -> io::Result<[u8; cipher::KEY_LEN]> {
        let secret: [u8; cipher::KEY_LEN] = cipher::random_bytes()?;
        write_private(&self.key_path(), STANDARD.encode(secret).as_bytes())?;
        tracing::debug!(path = %self.key_path().display(), "created vault key");
        Ok(secret)
    }
}

/// Atomically replace `path` with `contents`, readable by the owner only.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("vault path has no parent directory"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(VAULT_FILE_MODE))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
