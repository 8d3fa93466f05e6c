//! Local port selection for the tunnel forward.

use super::ConnectError;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

/// Inclusive range of local ports scanned for the tunnel forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const DEFAULT: PortRange = PortRange {
        start: 54321,
        end: 54400,
    };

    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn ports(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Bind the first free loopback port in `range`.
///
/// The listener is returned still bound, so the port cannot be taken by
/// another process between the scan and the forward.
pub fn bind_free_port(range: PortRange) -> Result<(TcpListener, u16), ConnectError> {
    for port in range.ports() {
        match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                tracing::debug!(port, "bound local forward port");
                return Ok((listener, port));
            }
            Err(e) if is_port_taken(&e) => continue,
            Err(e) => return Err(ConnectError::Forward(e)),
        }
    }
    Err(ConnectError::NoFreePort {
        start: range.start,
        end: range.end,
    })
}

fn is_port_taken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
    )
}
