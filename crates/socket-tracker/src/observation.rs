//! Inbound observations delivered by the syscall probe layer

use crate::types::{
    ConnectionId, ConnectionKey, Direction, RemoteAddr, RoleHint, SourceFunction, TimestampNs,
};

/// One discrete thing that happened on a socket.
///
/// Observations for a single key must be delivered in the order they
/// happened; different keys may be delivered from different threads.
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    Opened(ConnectionOpened),
    Data(DataObserved<'a>),
    Sendfile(SendfileObserved),
    Closed(ConnectionClosed),
    SslDetected(SslDetected),
    /// Connection incarnations the collector is done with
    CleanupSweep(&'a [ConnectionId]),
}

/// connect(), accept() or a first addressed send/recv returned.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOpened {
    pub key:              ConnectionKey,
    pub start_time_ticks: u64,
    pub addr:             RemoteAddr,
    pub role_hint:        RoleHint,
    pub source_fn:        SourceFunction,
    pub timestamp:        TimestampNs,
}

/// Bytes as staged by the probe: one flat buffer or a scatter/gather list.
#[derive(Debug, Clone, Copy)]
pub enum DataPayload<'a> {
    Buffer(&'a [u8]),
    Segments(&'a [&'a [u8]]),
}

impl DataPayload<'_> {
    /// Bytes actually staged, which may be fewer than the syscall moved.
    pub fn staged_len(&self) -> usize {
        match self {
            DataPayload::Buffer(buf) => buf.len(),
            DataPayload::Segments(segments) => segments.iter().map(|s| s.len()).sum(),
        }
    }
}

/// A read or write family syscall (or TLS library call) completed.
#[derive(Debug, Clone, Copy)]
pub struct DataObserved<'a> {
    pub key:              ConnectionKey,
    pub start_time_ticks: u64,
    pub direction:        Direction,
    pub payload:          DataPayload<'a>,
    /// Bytes the call reported as transferred
    pub byte_count:       usize,
    pub source_fn:        SourceFunction,
    /// Plaintext captured from a TLS library rather than the socket
    pub ssl:              bool,
    pub timestamp:        TimestampNs,
}

impl<'a> DataObserved<'a> {
    /// A plain socket read/write where everything transferred was staged.
    pub fn buffer(
        key: ConnectionKey,
        direction: Direction,
        buf: &'a [u8],
        source_fn: SourceFunction,
        timestamp: TimestampNs,
    ) -> Self {
        Self {
            key,
            start_time_ticks: 0,
            direction,
            payload: DataPayload::Buffer(buf),
            byte_count: buf.len(),
            source_fn,
            ssl: false,
            timestamp,
        }
    }

    /// A scatter/gather call where everything transferred was staged.
    pub fn segments(
        key: ConnectionKey,
        direction: Direction,
        segments: &'a [&'a [u8]],
        source_fn: SourceFunction,
        timestamp: TimestampNs,
    ) -> Self {
        let payload = DataPayload::Segments(segments);
        Self {
            key,
            start_time_ticks: 0,
            direction,
            byte_count: payload.staged_len(),
            payload,
            source_fn,
            ssl: false,
            timestamp,
        }
    }

    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, start_time_ticks: u64) -> Self {
        self.start_time_ticks = start_time_ticks;
        self
    }
}

/// sendfile() moved `byte_count` bytes out of the socket without the
/// payload passing through user memory.
#[derive(Debug, Clone, Copy)]
pub struct SendfileObserved {
    pub key:              ConnectionKey,
    pub start_time_ticks: u64,
    pub byte_count:       usize,
    pub timestamp:        TimestampNs,
}

/// close() succeeded on the handle.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionClosed {
    pub key:       ConnectionKey,
    pub timestamp: TimestampNs,
}

/// A TLS library was seen operating on the handle.
#[derive(Debug, Clone, Copy)]
pub struct SslDetected {
    pub key:              ConnectionKey,
    pub start_time_ticks: u64,
}
