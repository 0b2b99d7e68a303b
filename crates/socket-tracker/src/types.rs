//! Identifiers and small vocabulary types shared by observations and events

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Direction of data flow relative to the observed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Written or sent by the process
    Egress,
    /// Read or received by the process
    Ingress,
}

/// Which end of the connection the observed process is.
///
/// Values are bit flags so that a [`TraceMask`](crate::TraceMask) can be
/// tested with a single AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    Client  = 1 << 0,
    Server  = 1 << 1,
    #[default]
    Unknown = 1 << 2,
}

impl Role {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_resolved(self) -> bool {
        self != Role::Unknown
    }
}

/// How a connection came to be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleHint {
    /// connect() returned: the process is the client
    Connect,
    /// accept() returned: the process is the server
    Accept,
    /// First sighting through an addressed send/recv on an untracked handle
    Implicit,
}

/// Operation that produced an observation.
///
/// Discriminants are part of the outbound event format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceFunction {
    #[default]
    Unknown        = 0,
    Accept         = 1,
    Connect        = 2,
    Close          = 3,
    Write          = 4,
    Read           = 5,
    Send           = 6,
    Recv           = 7,
    SendTo         = 8,
    RecvFrom       = 9,
    SendMsg        = 10,
    RecvMsg        = 11,
    SendMmsg       = 12,
    RecvMmsg       = 13,
    Writev         = 14,
    Readv          = 15,
    Sendfile       = 16,
    GoTlsConnWrite = 17,
    GoTlsConnRead  = 18,
    SslWrite       = 19,
    SslRead        = 20,
}

/// Newtype for nanosecond-precision timestamps (monotonic clock).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimestampNs(pub u64);

impl std::fmt::Display for TimestampNs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl From<u64> for TimestampNs {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<TimestampNs> for u64 {
    fn from(v: TimestampNs) -> Self {
        v.0
    }
}

/// Registry key: an open socket handle inside a process.
///
/// Unique while the handle is open; the same pair is reused once the
/// descriptor number is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub pid: u32,
    pub fd:  i32,
}

impl ConnectionKey {
    pub fn new(pid: u32, fd: i32) -> Self {
        Self { pid, fd }
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pid, self.fd)
    }
}

/// One incarnation of a [`ConnectionKey`].
///
/// `start_time_ticks` disambiguates pid reuse across processes and
/// `generation` disambiguates descriptor reuse within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    pub key:              ConnectionKey,
    pub start_time_ticks: u64,
    pub generation:       u64,
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.key, self.generation)
    }
}

/// Remote endpoint of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RemoteAddr {
    /// The connect/accept was never seen
    #[default]
    Unknown,
    /// IPv4 or IPv6 peer
    Inet(SocketAddr),
    /// Any other socket family (unix, netlink, ...), by family number
    Other { family: u16 },
}

impl RemoteAddr {
    /// Only INET-family and unknown connections are reported downstream.
    /// Unknown ones are kept because they may well be INET sockets whose
    /// setup happened before tracing started.
    pub fn is_traceable(&self) -> bool {
        !matches!(self, RemoteAddr::Other { .. })
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            RemoteAddr::Inet(addr) => Some(addr.port()),
            _ => None,
        }
    }
}

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        RemoteAddr::Inet(addr)
    }
}
