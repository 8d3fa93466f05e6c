//! SSH tunnel and local port forward.
//!
//! [`SshTunnel`] owns an authenticated SSH session. [`PortForward`] runs a
//! background thread that accepts connections on a bound loopback listener
//! and pipes each one through a `direct-tcpip` channel to the database
//! endpoint on the far side of the tunnel.

use super::{ConnectError, Forward, Tunnel};
use crate::models::ConnectionCredentials;
use ssh2::{Channel, Session};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep between pump passes when no bytes moved.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

const PUMP_BUFFER: usize = 16 * 1024;

/// An authenticated SSH session to the tunnel host.
pub struct SshTunnel {
    session: Option<Session>,
    endpoint: String,
}

impl SshTunnel {
    /// Connect and authenticate with the tunnel credentials.
    ///
    /// # Errors
    /// - `TunnelRefused` if the TCP connection cannot be made
    /// - `TunnelHandshake` if the SSH handshake fails
    /// - `TunnelAuth` if the server rejects the user/password
    pub fn connect(
        creds: &ConnectionCredentials,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let endpoint = creds.tunnel_endpoint();
        tracing::debug!(%endpoint, "connecting tunnel");

        let refused = |source: io::Error| ConnectError::TunnelRefused {
            endpoint: endpoint.clone(),
            source,
        };
        let addr = (creds.tunnel_host.as_str(), creds.tunnel_port)
            .to_socket_addrs()
            .map_err(refused)?
            .next()
            .ok_or_else(|| {
                refused(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host name did not resolve",
                ))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(refused)?;

        let handshake = |source: ssh2::Error| ConnectError::TunnelHandshake {
            endpoint: endpoint.clone(),
            source,
        };
        let mut session = Session::new().map_err(handshake)?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(handshake)?;

        let auth_failed = |reason: String| ConnectError::TunnelAuth {
            user: creds.tunnel_user.clone(),
            endpoint: endpoint.clone(),
            reason,
        };
        session
            .userauth_password(&creds.tunnel_user, &creds.tunnel_password)
            .map_err(|e| auth_failed(e.message().to_string()))?;
        if !session.authenticated() {
            return Err(auth_failed("server did not accept credentials".to_string()));
        }

        tracing::info!(%endpoint, "tunnel established");
        Ok(Self {
            session: Some(session),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Start forwarding `listener` to `remote_host:remote_port` through this tunnel.
    ///
    /// The session is switched to non-blocking mode and handed to the pump
    /// thread; it must not be used for anything else until the forward stops.
    pub fn forward(
        &self,
        listener: TcpListener,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<PortForward, ConnectError> {
        let session = self.session.clone().ok_or_else(|| {
            ConnectError::Forward(io::Error::new(
                io::ErrorKind::NotConnected,
                "tunnel is closed",
            ))
        })?;
        PortForward::start(session, listener, remote_host.to_string(), remote_port)
    }

    /// Disconnect. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.set_blocking(true);
            if let Err(e) = session.disconnect(None, "taskroot closing", None) {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "tunnel disconnect failed");
            } else {
                tracing::debug!(endpoint = %self.endpoint, "tunnel closed");
            }
        }
    }
}

impl Tunnel for SshTunnel {
    fn forward(
        &mut self,
        listener: TcpListener,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn Forward>, ConnectError> {
        Ok(Box::new(SshTunnel::forward(
            self,
            listener,
            remote_host,
            remote_port,
        )?))
    }

    fn close(&mut self) {
        SshTunnel::close(self);
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// A running local port forward.
pub struct PortForward {
    local_port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PortForward {
    fn start(
        session: Session,
        listener: TcpListener,
        remote_host: String,
        remote_port: u16,
    ) -> Result<Self, ConnectError> {
        let local_port = listener.local_addr().map_err(ConnectError::Forward)?.port();
        listener
            .set_nonblocking(true)
            .map_err(ConnectError::Forward)?;
        session.set_blocking(false);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("taskroot-forward-{}", local_port))
            .spawn(move || {
                pump_loop(&session, &listener, &remote_host, remote_port, &stop_flag);
            })
            .map_err(ConnectError::Forward)?;

        tracing::debug!(local_port, "port forward running");
        Ok(Self {
            local_port,
            stop,
            handle: Some(handle),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop accepting, close every piped connection and join the thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(local_port = self.local_port, "port forward thread panicked");
            } else {
                tracing::debug!(local_port = self.local_port, "port forward stopped");
            }
        }
    }
}

impl Forward for PortForward {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn stop(&mut self) {
        PortForward::stop(self);
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(
    session: &Session,
    listener: &TcpListener,
    remote_host: &str,
    remote_port: u16,
    stop: &AtomicBool,
) {
    let mut pipes: Vec<Pipe> = Vec::new();

    while !stop.load(Ordering::SeqCst) {
        let mut moved = false;

        match listener.accept() {
            Ok((stream, peer)) => {
                moved = true;
                match open_channel(session, remote_host, remote_port, stop) {
                    Ok(channel) => match Pipe::new(stream, channel) {
                        Ok(pipe) => {
                            tracing::debug!(%peer, "forwarding connection");
                            pipes.push(pipe);
                        }
                        Err(e) => tracing::warn!(%peer, error = %e, "could not pipe connection"),
                    },
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "tunnel refused forward channel")
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!(error = %e, "accept on forward port failed"),
        }

        pipes.retain_mut(|pipe| match pipe.pump() {
            Ok(Pumped::Moved) => {
                moved = true;
                true
            }
            Ok(Pumped::Idle) => true,
            Ok(Pumped::Closed) => {
                pipe.close();
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "forwarded connection dropped");
                pipe.close();
                false
            }
        });

        if !moved {
            thread::sleep(IDLE_SLEEP);
        }
    }

    for mut pipe in pipes {
        pipe.close();
    }
}

fn open_channel(
    session: &Session,
    remote_host: &str,
    remote_port: u16,
    stop: &AtomicBool,
) -> io::Result<Channel> {
    loop {
        match session.channel_direct_tcpip(remote_host, remote_port, None) {
            Ok(channel) => return Ok(channel),
            Err(e) => {
                let e = io::Error::from(e);
                if e.kind() != io::ErrorKind::WouldBlock || stop.load(Ordering::SeqCst) {
                    return Err(e);
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

enum Pumped {
    Moved,
    Idle,
    Closed,
}

/// One local connection paired with its tunnel channel.
struct Pipe {
    stream: TcpStream,
    channel: Channel,
    to_remote: Vec<u8>,
    to_local: Vec<u8>,
    local_eof: bool,
    eof_sent: bool,
}

impl Pipe {
    fn new(stream: TcpStream, channel: Channel) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            channel,
            to_remote: Vec::new(),
            to_local: Vec::new(),
            local_eof: false,
            eof_sent: false,
        })
    }

    fn pump(&mut self) -> io::Result<Pumped> {
        let mut moved = false;
        let mut buf = [0u8; PUMP_BUFFER];

        if self.to_remote.is_empty() && !self.local_eof {
            match self.stream.read(&mut buf) {
                Ok(0) => self.local_eof = true,
                Ok(n) => {
                    self.to_remote.extend_from_slice(&buf[..n]);
                    moved = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        moved |= drain(&mut self.to_remote, &mut self.channel)?;
        if self.local_eof && self.to_remote.is_empty() && !self.eof_sent {
            self.eof_sent = self.channel.send_eof().is_ok();
        }

        if self.to_local.is_empty() {
            match self.channel.read(&mut buf) {
                Ok(0) if self.channel.eof() => return Ok(Pumped::Closed),
                Ok(0) => {}
                Ok(n) => {
                    self.to_local.extend_from_slice(&buf[..n]);
                    moved = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
        moved |= drain(&mut self.to_local, &mut self.stream)?;

        Ok(if moved { Pumped::Moved } else { Pumped::Idle })
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        let _ = self.channel.close();
    }
}

/// Write as much of `pending` as `out` accepts. Returns whether anything moved.
fn drain(pending: &mut Vec<u8>, out: &mut impl Write) -> io::Result<bool> {
    if pending.is_empty() {
        return Ok(false);
    }
    match out.write(pending) {
        Ok(0) => Err(io::Error::new(io::ErrorKind::WriteZero, "peer closed")),
        Ok(n) => {
            pending.drain(..n);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds_for(port: u16) -> ConnectionCredentials {
        ConnectionCredentials {
            use_tunnel: true,
            tunnel_host: "127.0.0.1".to_string(),
            tunnel_port: port,
            tunnel_user: "deploy".to_string(),
            tunnel_password: "pw".to_string(),
            ..Default::default()
        }
    }

    fn closed_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_connect_refused() {
        let port = closed_port();
        let err = SshTunnel::connect(&creds_for(port), Duration::from_secs(2))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::TunnelRefused { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[test]
    fn test_handshake_fails_against_non_ssh_peer() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        });

        let err = SshTunnel::connect(&creds_for(port), Duration::from_secs(2))
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::TunnelHandshake { .. }));
        server.join().unwrap();
    }

    #[test]
    fn test_drain_writes_and_keeps_remainder() {
        struct Limited(Vec<u8>);
        impl Write for Limited {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(3);
                self.0.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut pending = b"abcdef".to_vec();
        let mut out = Limited(Vec::new());
        assert!(drain(&mut pending, &mut out).unwrap());
        assert_eq!(pending, b"def");
        assert_eq!(out.0, b"abc");
        assert!(!drain(&mut Vec::new(), &mut out).unwrap());
    }
}
