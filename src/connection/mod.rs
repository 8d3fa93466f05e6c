//! Tunnel and database session lifecycle.
//!
//! [`TunnelConnectionManager`] turns [`ConnectionCredentials`] into a
//! [`LiveSession`]: optionally an SSH tunnel with a local port forward, then
//! a PostgreSQL client connected through it (or directly). Teardown always
//! runs database session, then forward, then tunnel, and is idempotent.

pub mod port;
pub mod tunnel;

pub use port::{PortRange, bind_free_port};
pub use tunnel::{PortForward, SshTunnel};

use crate::models::ConnectionCredentials;
use crate::source::PgSource;
use crate::{Error, Result};
use postgres::error::SqlState;
use postgres::{Client, NoTls};
use std::io;
use std::net::TcpListener;
use std::time::Duration;

const APPLICATION_NAME: &str = "taskroot";

/// Failures while establishing a session. None are retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Tunnel connection to {endpoint} refused")]
    TunnelRefused {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake with {endpoint} failed")]
    TunnelHandshake {
        endpoint: String,
        #[source]
        source: ssh2::Error,
    },

    #[error("Tunnel authentication failed for {user}@{endpoint}: {reason}")]
    TunnelAuth {
        user: String,
        endpoint: String,
        reason: String,
    },

    #[error("No free local port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Local port forward failed")]
    Forward(#[source] io::Error),

    #[error("Database connection to {endpoint} refused")]
    DbRefused {
        endpoint: String,
        #[source]
        source: postgres::Error,
    },

    #[error("Database authentication failed for user {user} on {database}")]
    DbAuth {
        user: String,
        database: String,
        #[source]
        source: postgres::Error,
    },

    #[error("Database connection to {endpoint} failed")]
    Db {
        endpoint: String,
        #[source]
        source: postgres::Error,
    },
}

impl ConnectError {
    /// Short machine-readable tag for JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::TunnelRefused { .. } => "tunnel_refused",
            ConnectError::TunnelHandshake { .. } => "tunnel_handshake",
            ConnectError::TunnelAuth { .. } => "tunnel_auth",
            ConnectError::NoFreePort { .. } => "no_free_port",
            ConnectError::Forward(_) => "forward",
            ConnectError::DbRefused { .. } => "db_refused",
            ConnectError::DbAuth { .. } => "db_auth",
            ConnectError::Db { .. } => "db",
        }
    }
}

/// Knobs that come from configuration rather than credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectSettings {
    pub port_range: PortRange,
    pub timeout: Duration,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            port_range: PortRange::DEFAULT,
            timeout: Duration::from_secs(crate::config::resolver::DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Opens the tunnel leg of a session. [`SshConnector`] is the real one.
pub trait TunnelConnector: Send {
    fn connect(
        &self,
        creds: &ConnectionCredentials,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Tunnel>, ConnectError>;
}

/// An established tunnel able to forward a bound local listener.
pub trait Tunnel: Send {
    fn forward(
        &mut self,
        listener: TcpListener,
        remote_host: &str,
        remote_port: u16,
    ) -> std::result::Result<Box<dyn Forward>, ConnectError>;

    /// Disconnect. Safe to call more than once.
    fn close(&mut self);
}

/// A running local port forward.
pub trait Forward: Send {
    fn local_port(&self) -> u16;

    /// Stop forwarding and wait for in-flight connections to end.
    fn stop(&mut self);
}

/// Password-authenticated SSH tunnels.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl TunnelConnector for SshConnector {
    fn connect(
        &self,
        creds: &ConnectionCredentials,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Tunnel>, ConnectError> {
        Ok(Box::new(SshTunnel::connect(creds, timeout)?))
    }
}

/// An open database session, possibly riding a tunnel.
///
/// Fields are taken out one by one during [`LiveSession::close`], so a
/// session that failed half-way through opening closes the same way.
pub struct LiveSession {
    client: Option<Client>,
    forward: Option<Box<dyn Forward>>,
    tunnel: Option<Box<dyn Tunnel>>,
    db_endpoint: String,
}

impl LiveSession {
    fn empty(db_endpoint: String) -> Self {
        Self {
            client: None,
            forward: None,
            tunnel: None,
            db_endpoint,
        }
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    /// Local forward port, when tunneled.
    pub fn local_port(&self) -> Option<u16> {
        self.forward.as_ref().map(|forward| forward.local_port())
    }

    /// The database endpoint as the user configured it.
    pub fn db_endpoint(&self) -> &str {
        &self.db_endpoint
    }

    /// Borrow the session as a workflow source.
    pub fn source(&mut self) -> Result<PgSource<'_>> {
        let location = match self.local_port() {
            Some(port) => format!("{} via 127.0.0.1:{}", self.db_endpoint, port),
            None => self.db_endpoint.clone(),
        };
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| Error::Other("Database session is closed".to_string()))?;
        Ok(PgSource::new(client, location))
    }

    /// Close database session, forward and tunnel, in that order.
    ///
    /// Never fails; teardown errors are logged and swallowed.
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            match client.close() {
                Ok(()) => tracing::debug!(endpoint = %self.db_endpoint, "database session closed"),
                Err(e) => {
                    tracing::warn!(endpoint = %self.db_endpoint, error = %e, "database close failed")
                }
            }
        }
        if let Some(mut forward) = self.forward.take() {
            forward.stop();
        }
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.close();
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns at most one live session at a time.
pub struct TunnelConnectionManager {
    settings: ConnectSettings,
    connector: Box<dyn TunnelConnector>,
    live: Option<LiveSession>,
}

impl TunnelConnectionManager {
    pub fn new(settings: ConnectSettings) -> Self {
        Self::with_connector(settings, Box::new(SshConnector))
    }

    pub fn with_connector(settings: ConnectSettings, connector: Box<dyn TunnelConnector>) -> Self {
        Self {
            settings,
            connector,
            live: None,
        }
    }

    pub fn settings(&self) -> ConnectSettings {
        self.settings
    }

    /// Open a session for `creds`, closing any previous one first.
    ///
    /// # Errors
    /// Any [`ConnectError`]. Whatever was established before the failure is
    /// torn down before this returns.
    pub fn open(&mut self, creds: &ConnectionCredentials) -> Result<&mut LiveSession> {
        self.close();
        let session = establish(creds, &self.settings, self.connector.as_ref())?;
        Ok(self.live.insert(session))
    }

    pub fn session(&mut self) -> Option<&mut LiveSession> {
        self.live.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.live.as_ref().is_some_and(LiveSession::is_open)
    }

    /// Close the current session, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut session) = self.live.take() {
            session.close();
        }
    }
}

#[cfg(test)]
impl TunnelConnectionManager {
    /// A manager holding a session with nothing behind it yet.
    pub(crate) fn with_idle_session(db_endpoint: &str) -> Self {
        Self {
            settings: ConnectSettings::default(),
            connector: Box::new(SshConnector),
            live: Some(LiveSession::empty(db_endpoint.to_string())),
        }
    }

    pub(crate) fn has_session(&self) -> bool {
        self.live.is_some()
    }
}

impl Drop for TunnelConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn establish(
    creds: &ConnectionCredentials,
    settings: &ConnectSettings,
    connector: &dyn TunnelConnector,
) -> std::result::Result<LiveSession, ConnectError> {
    let mut session = LiveSession::empty(creds.db_endpoint());

    let (host, port) = if creds.use_tunnel {
        let tunnel = session
            .tunnel
            .insert(connector.connect(creds, settings.timeout)?);
        let (listener, local_port) = bind_free_port(settings.port_range)?;
        session.forward = Some(tunnel.forward(listener, &creds.db_host, creds.db_port)?);
        ("127.0.0.1".to_string(), local_port)
    } else {
        (creds.db_host.clone(), creds.db_port)
    };

    tracing::debug!(%host, port, database = %creds.db_name, "opening database session");
    let client = db_config(creds, &host, port, settings.timeout)
        .connect(NoTls)
        .map_err(|e| classify_db_error(e, creds))?;
    session.client = Some(client);

    tracing::info!(
        endpoint = %session.db_endpoint,
        tunneled = session.is_tunneled(),
        "database session open"
    );
    Ok(session)
}

fn db_config(
    creds: &ConnectionCredentials,
    host: &str,
    port: u16,
    timeout: Duration,
) -> postgres::Config {
    let mut config = postgres::Config::new();
    config
        .host(host)
        .port(port)
        .dbname(&creds.db_name)
        .user(&creds.db_user)
        .password(&creds.db_password)
        .application_name(APPLICATION_NAME)
        .connect_timeout(timeout)
        .options(&format!("-c statement_timeout={}", timeout.as_millis()));
    config
}

fn classify_db_error(err: postgres::Error, creds: &ConnectionCredentials) -> ConnectError {
    let auth_failure = err.code().is_some_and(|code| {
        *code == SqlState::INVALID_PASSWORD
            || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
    });
    if auth_failure {
        return ConnectError::DbAuth {
            user: creds.db_user.clone(),
            database: creds.db_name.clone(),
            source: err,
        };
    }
    if is_connection_refused(&err) {
        return ConnectError::DbRefused {
            endpoint: creds.db_endpoint(),
            source: err,
        };
    }
    ConnectError::Db {
        endpoint: creds.db_endpoint(),
        source: err,
    }
}

fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    fn closed_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    fn direct_creds(port: u16) -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: false,
            db_host: "127.0.0.1".to_string(),
            db_port: port,
            db_name: "directum".to_string(),
            db_user: "reader".to_string(),
            db_password: "pw".to_string(),
            ..Default::default()
        }
    }

    fn quick_settings() -> ConnectSettings {
        ConnectSettings {
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Stands in for SSH: records what happens to each leg of the session.
    struct RecordingConnector {
        journal: Journal,
        fail_forward: bool,
    }

    struct RecordingTunnel {
        journal: Journal,
        fail_forward: bool,
    }

    struct RecordingForward {
        journal: Journal,
        local_port: u16,
    }

    impl RecordingConnector {
        fn new(journal: &Journal) -> Self {
            Self {
                journal: Arc::clone(journal),
                fail_forward: false,
            }
        }
    }

    fn note(journal: &Journal, entry: String) {
        journal.lock().unwrap().push(entry);
    }

    impl TunnelConnector for RecordingConnector {
        fn connect(
            &self,
            creds: &ConnectionCredentials,
            _timeout: Duration,
        ) -> std::result::Result<Box<dyn Tunnel>, ConnectError> {
            note(&self.journal, format!("tunnel to {}", creds.tunnel_endpoint()));
            Ok(Box::new(RecordingTunnel {
                journal: Arc::clone(&self.journal),
                fail_forward: self.fail_forward,
            }))
        }
    }

    impl Tunnel for RecordingTunnel {
        fn forward(
            &mut self,
            listener: TcpListener,
            remote_host: &str,
            remote_port: u16,
        ) -> std::result::Result<Box<dyn Forward>, ConnectError> {
            let local_port = listener.local_addr().map_err(ConnectError::Forward)?.port();
            if self.fail_forward {
                return Err(ConnectError::Forward(io::Error::other("channel rejected")));
            }
            note(
                &self.journal,
                format!("forward {} -> {}:{}", local_port, remote_host, remote_port),
            );
            // Nothing accepts on the port, so the database connect is refused.
            drop(listener);
            Ok(Box::new(RecordingForward {
                journal: Arc::clone(&self.journal),
                local_port,
            }))
        }

        fn close(&mut self) {
            note(&self.journal, "tunnel closed".to_string());
        }
    }

    impl Forward for RecordingForward {
        fn local_port(&self) -> u16 {
            self.local_port
        }

        fn stop(&mut self) {
            note(&self.journal, "forward stopped".to_string());
        }
    }

    fn tunnel_creds() -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: true,
            tunnel_host: "bastion".to_string(),
            tunnel_port: 22,
            tunnel_user: "deploy".to_string(),
            tunnel_password: "secret".to_string(),
            db_host: "10.0.0.5".to_string(),
            ..direct_creds(5432)
        }
    }

    fn hold_ports(range: std::ops::RangeInclusive<u16>) -> Vec<TcpListener> {
        range
            .filter_map(|port| TcpListener::bind(("127.0.0.1", port)).ok())
            .collect()
    }

    #[test]
    #[serial]
    fn test_open_forwards_on_first_free_port_and_unwinds_on_db_failure() {
        let _held = hold_ports(54321..=54330);
        let journal = Journal::default();
        let mut manager = TunnelConnectionManager::with_connector(
            quick_settings(),
            Box::new(RecordingConnector::new(&journal)),
        );

        let err = manager.open(&tunnel_creds()).err().unwrap();

        match err {
            Error::Connect(ConnectError::DbRefused { endpoint, .. }) => {
                assert_eq!(endpoint, "10.0.0.5:5432");
            }
            other => panic!("expected DbRefused, got {other:?}"),
        }
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "tunnel to bastion:22".to_string(),
                "forward 54331 -> 10.0.0.5:5432".to_string(),
                "forward stopped".to_string(),
                "tunnel closed".to_string(),
            ]
        );
        assert!(manager.session().is_none());
        assert!(!manager.is_open());
    }

    #[test]
    #[serial]
    fn test_forward_failure_closes_the_tunnel() {
        let journal = Journal::default();
        let connector = RecordingConnector {
            journal: Arc::clone(&journal),
            fail_forward: true,
        };
        let mut manager =
            TunnelConnectionManager::with_connector(quick_settings(), Box::new(connector));

        let err = manager.open(&tunnel_creds()).err().unwrap();

        assert_eq!(err.kind(), "forward");
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["tunnel to bastion:22".to_string(), "tunnel closed".to_string()]
        );
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_direct_open_never_touches_the_connector() {
        let journal = Journal::default();
        let mut manager = TunnelConnectionManager::with_connector(
            quick_settings(),
            Box::new(RecordingConnector::new(&journal)),
        );

        let err = manager.open(&direct_creds(closed_port())).err().unwrap();

        assert!(matches!(err, Error::Connect(ConnectError::DbRefused { .. })));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_direct_connection_refused_is_db_refused() {
        let port = closed_port();
        let mut manager = TunnelConnectionManager::new(quick_settings());

        let err = manager.open(&direct_creds(port)).err().unwrap();

        match err {
            Error::Connect(ConnectError::DbRefused { endpoint, .. }) => {
                assert_eq!(endpoint, format!("127.0.0.1:{}", port));
            }
            other => panic!("expected DbRefused, got {other:?}"),
        }
        assert!(!manager.is_open());
    }

    #[test]
    fn test_tunnel_refused_leaves_nothing_open() {
        let mut creds = direct_creds(5432);
        creds.use_tunnel = true;
        creds.tunnel_host = "127.0.0.1".to_string();
        creds.tunnel_port = closed_port();
        creds.tunnel_user = "deploy".to_string();
        let mut manager = TunnelConnectionManager::new(quick_settings());

        let err = manager.open(&creds).err().unwrap();

        assert!(matches!(
            err,
            Error::Connect(ConnectError::TunnelRefused { .. })
        ));
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut manager = TunnelConnectionManager::new(ConnectSettings::default());
        manager.close();
        manager.close();
        assert!(!manager.is_open());

        let mut session = LiveSession::empty("db:5432".to_string());
        session.close();
        session.close();
        assert!(!session.is_open());
        assert!(session.local_port().is_none());
    }

    #[test]
    fn test_closed_session_is_not_a_source() {
        let mut session = LiveSession::empty("db:5432".to_string());
        assert!(session.source().is_err());
    }

    #[test]
    fn test_connect_error_kinds() {
        assert_eq!(
            ConnectError::NoFreePort { start: 1, end: 2 }.kind(),
            "no_free_port"
        );
        let err = ConnectError::TunnelAuth {
            user: "deploy".to_string(),
            endpoint: "bastion:22".to_string(),
            reason: "denied".to_string(),
        };
        assert_eq!(err.kind(), "tunnel_auth");
        assert!(err.to_string().contains("deploy@bastion:22"));
    }

    #[test]
    fn test_is_connection_refused_walks_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] io::Error);

        let refused = Outer(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(is_connection_refused(&refused));

        let other = Outer(io::Error::from(io::ErrorKind::TimedOut));
        assert!(!is_connection_refused(&other));
    }
}
