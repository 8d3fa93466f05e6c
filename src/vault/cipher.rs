//! Key derivation and the on-disk ciphertext envelope.
//!
//! Envelope layout:
//! ```text
//! +------+------------+---------------------------------+
//! | TRV1 | nonce (12) | ChaCha20-Poly1305 ciphertext+tag |
//! +------+------------+---------------------------------+
//! ```
//! The magic is also bound as associated data.

use super::CorruptReason;
use crate::sys::UserIdentity;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use std::io;

pub const MAGIC: &[u8; 4] = b"TRV1";
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

const KEY_DOMAIN: &[u8] = b"taskroot-vault-key-v1";

/// Fill a buffer from the OS random source.
pub fn random_bytes<const N: usize>() -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|e| io::Error::other(e.to_string()))?;
    Ok(buf)
}

/// Derive the vault key from the local key file secret and the account identity.
pub fn derive_key(secret: &[u8; KEY_LEN], identity: &UserIdentity) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(secret);
    hasher.update(identity.key_material());
    hasher.finalize().into()
}

pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> io::Result<Vec<u8>> {
    let nonce: [u8; NONCE_LEN] = random_bytes()?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: MAGIC,
            },
        )
        .map_err(|_| io::Error::other("encryption failed"))?;

    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open(key: &[u8; KEY_LEN], envelope: &[u8]) -> Result<Vec<u8>, CorruptReason> {
    if envelope.len() < MAGIC.len() + NONCE_LEN + TAG_LEN {
        return Err(CorruptReason::Truncated);
    }
    let (magic, rest) = envelope.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(CorruptReason::BadHeader);
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: MAGIC,
            },
        )
        .map_err(|_| CorruptReason::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: u32) -> UserIdentity {
        UserIdentity {
            uid,
            username: "ops".to_string(),
            machine_id: "m".to_string(),
        }
    }

    #[test]
    fn test_open_rejects_short_envelope() {
        let key = [7u8; KEY_LEN];
        assert_eq!(open(&key, b"TRV1abc"), Err(CorruptReason::Truncated));
    }

    #[test]
    fn test_open_rejects_wrong_magic() {
        let key = [7u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload").unwrap();
        sealed[0] = b'X';
        assert_eq!(open(&key, &sealed), Err(CorruptReason::BadHeader));
    }

    #[test]
    fn test_open_detects_tampering() {
        let key = [7u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(open(&key, &sealed), Err(CorruptReason::Decrypt));
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = [1u8; KEY_LEN];
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(open(&key, &a).unwrap(), b"same");
        assert_eq!(open(&key, &b).unwrap(), b"same");
    }

    #[test]
    fn test_derive_key_depends_on_identity() {
        let secret = [3u8; KEY_LEN];
        assert_ne!(derive_key(&secret, &identity(1)), derive_key(&secret, &identity(2)));
        assert_eq!(derive_key(&secret, &identity(1)), derive_key(&secret, &identity(1)));
    }
}
