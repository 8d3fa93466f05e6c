//! `taskroot session show|clear`.

use super::{Output, json};
use crate::models::ConnectionCredentials;
use crate::vault::{CredentialVault, VaultError};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// State of the saved session. Passwords are always masked.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionShow {
    Found {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_at: Option<DateTime<Utc>>,
        credentials: ConnectionCredentials,
    },
    NotFound {
        path: String,
    },
    Corrupt {
        path: String,
        reason: String,
        message: String,
    },
}

impl Output for SessionShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self {
            SessionShow::Found {
                path,
                saved_at,
                credentials: c,
            } => {
                let mut lines = vec![format!("Saved session: {}", path)];
                if let Some(at) = saved_at {
                    lines.push(format!("  Saved: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
                }
                if c.use_tunnel {
                    lines.push(format!(
                        "  Tunnel: {}@{} (password {})",
                        c.tunnel_user,
                        c.tunnel_endpoint(),
                        c.tunnel_password
                    ));
                } else {
                    lines.push("  Tunnel: off".to_string());
                }
                lines.push(format!(
                    "  Database: {}/{} as {} (password {})",
                    c.db_endpoint(),
                    c.db_name,
                    c.db_user,
                    c.db_password
                ));
                lines.join("\n")
            }
            SessionShow::NotFound { path } => format!("No saved session ({})", path),
            SessionShow::Corrupt { path, message, .. } => {
                format!("Saved session is unusable: {}\n  File: {}", message, path)
            }
        }
    }
}

pub fn session_show(data_dir: &Path) -> Result<SessionShow> {
    let vault = CredentialVault::for_current_user(data_dir);
    show(&vault)
}

fn show(vault: &CredentialVault) -> Result<SessionShow> {
    let path = vault.path().display().to_string();
    match vault.load() {
        Ok(Some(creds)) => Ok(SessionShow::Found {
            path,
            saved_at: vault.saved_at(),
            credentials: creds.masked(),
        }),
        Ok(None) => Ok(SessionShow::NotFound { path }),
        Err(VaultError::Corrupt(reason)) => Ok(SessionShow::Corrupt {
            path,
            reason: reason.as_str().to_string(),
            message: reason.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[derive(Serialize)]
pub struct SessionCleared {
    pub removed: bool,
    pub path: String,
}

impl Output for SessionCleared {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.removed {
            format!("Cleared saved session ({})", self.path)
        } else {
            "No saved session to clear".to_string()
        }
    }
}

pub fn session_clear(data_dir: &Path) -> Result<SessionCleared> {
    let vault = CredentialVault::for_current_user(data_dir);
    clear(&vault)
}

fn clear(vault: &CredentialVault) -> Result<SessionCleared> {
    let removed = vault.clear()?;
    Ok(SessionCleared {
        removed,
        path: vault.path().display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    fn creds() -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: true,
            tunnel_host: "bastion".to_string(),
            tunnel_port: 22,
            tunnel_user: "ops".to_string(),
            tunnel_password: "ssh-secret".to_string(),
            db_host: "10.0.0.5".to_string(),
            db_port: 5432,
            db_name: "directum".to_string(),
            db_user: "reader".to_string(),
            db_password: "db-secret".to_string(),
        }
    }

    #[test]
    fn test_show_not_found() {
        let env = TestEnv::new();
        let shown = show(&env.vault_for(1000, "alice")).unwrap();
        assert!(matches!(shown, SessionShow::NotFound { .. }));
        assert!(shown.to_json().contains(r#""status":"not_found""#));
    }

    #[test]
    fn test_show_found_masks_passwords() {
        let env = TestEnv::new();
        let vault = env.vault_for(1000, "alice");
        vault.save(&creds()).unwrap();

        let shown = show(&vault).unwrap();

        let json = shown.to_json();
        let human = shown.to_human();
        assert!(json.contains(r#""status":"found""#));
        for text in [&json, &human] {
            assert!(!text.contains("ssh-secret"));
            assert!(!text.contains("db-secret"));
        }
        assert!(human.contains("ops@bastion:22"));
        assert!(human.contains("10.0.0.5:5432/directum"));
    }

    #[test]
    fn test_show_corrupt_under_other_identity() {
        let env = TestEnv::new();
        env.vault_for(1000, "alice").save(&creds()).unwrap();

        let shown = show(&env.vault_for(1001, "bob")).unwrap();

        match shown {
            SessionShow::Corrupt { reason, .. } => assert_eq!(reason, "decrypt"),
            _ => panic!("expected corrupt"),
        }
    }

    #[test]
    fn test_clear_reports_removal_once() {
        let env = TestEnv::new();
        let vault = env.vault_for(1000, "alice");
        vault.save(&creds()).unwrap();

        assert!(clear(&vault).unwrap().removed);
        let again = clear(&vault).unwrap();
        assert!(!again.removed);
        assert_eq!(again.to_human(), "No saved session to clear");
    }
}
