//! Connection parameters for one session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tunnel and database parameters.
///
/// Built once per session (from prompts, flags, or the vault) and never
/// mutated afterwards. The vault stores exactly this record.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCredentials {
    pub use_tunnel: bool,
    pub tunnel_host: String,
    pub tunnel_port: u16,
    pub tunnel_user: String,
    pub tunnel_password: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
}

impl ConnectionCredentials {
    /// The endpoint the database is reachable at from the tunnel host
    /// (or directly, without a tunnel).
    pub fn db_endpoint(&self) -> String {
        format!("{}:{}", self.db_host, self.db_port)
    }

    pub fn tunnel_endpoint(&self) -> String {
        format!("{}:{}", self.tunnel_host, self.tunnel_port)
    }

    /// Copy of this record with both passwords replaced for display.
    pub fn masked(&self) -> Self {
        Self {
            tunnel_password: mask(&self.tunnel_password),
            db_password: mask(&self.db_password),
            ..self.clone()
        }
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

// Passwords must never reach logs through `{:?}`.
impl fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("use_tunnel", &self.use_tunnel)
            .field("tunnel_host", &self.tunnel_host)
            .field("tunnel_port", &self.tunnel_port)
            .field("tunnel_user", &self.tunnel_user)
            .field("tunnel_password", &mask(&self.tunnel_password))
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &mask(&self.db_password))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: true,
            tunnel_host: "bastion.example".to_string(),
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
    fn test_debug_masks_passwords() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("ssh-secret"));
        assert!(!rendered.contains("db-secret"));
        assert!(rendered.contains("bastion.example"));
    }

    #[test]
    fn test_masked_keeps_empty_password_empty() {
        let creds = ConnectionCredentials {
            db_password: String::new(),
            ..sample()
        };
        let masked = creds.masked();
        assert_eq!(masked.db_password, "");
        assert_eq!(masked.tunnel_password, "********");
        assert_eq!(masked.db_host, "10.0.0.5");
    }

    #[test]
    fn test_endpoints() {
        let creds = sample();
        assert_eq!(creds.db_endpoint(), "10.0.0.5:5432");
        assert_eq!(creds.tunnel_endpoint(), "bastion.example:22");
    }
}
