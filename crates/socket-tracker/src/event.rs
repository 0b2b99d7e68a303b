//! Outbound events for the downstream collector

use bytes::Bytes;
use proto_infer::Protocol;
use serde::Serialize;

use crate::types::{ConnectionId, Direction, RemoteAddr, Role, SourceFunction, TimestampNs};

/// Set in [`StatsEvent::conn_events`] on the first report of a connection.
pub const CONN_OPEN: u32 = 1 << 0;
/// Set in [`StatsEvent::conn_events`] on the final report of a connection.
pub const CONN_CLOSE: u32 = 1 << 1;

/// Events produced by the [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TrackerEvent {
    ConnectionOpen(OpenEvent),
    ConnectionClose(CloseEvent),
    ConnectionStats(StatsEvent),
    DataChunk(DataChunkEvent),
}

impl TrackerEvent {
    pub fn conn_id(&self) -> ConnectionId {
        match self {
            TrackerEvent::ConnectionOpen(e) => e.conn_id,
            TrackerEvent::ConnectionClose(e) => e.conn_id,
            TrackerEvent::ConnectionStats(e) => e.conn_id,
            TrackerEvent::DataChunk(e) => e.conn_id,
        }
    }

    pub fn timestamp(&self) -> TimestampNs {
        match self {
            TrackerEvent::ConnectionOpen(e) => e.timestamp,
            TrackerEvent::ConnectionClose(e) => e.timestamp,
            TrackerEvent::ConnectionStats(e) => e.timestamp,
            TrackerEvent::DataChunk(e) => e.timestamp,
        }
    }

    pub fn as_data_chunk(&self) -> Option<&DataChunkEvent> {
        match self {
            TrackerEvent::DataChunk(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn as_stats(&self) -> Option<&StatsEvent> {
        match self {
            TrackerEvent::ConnectionStats(stats) => Some(stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenEvent {
    pub timestamp: TimestampNs,
    pub conn_id:   ConnectionId,
    pub source_fn: SourceFunction,
    pub addr:      RemoteAddr,
    pub role:      Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseEvent {
    pub timestamp: TimestampNs,
    pub conn_id:   ConnectionId,
    pub source_fn: SourceFunction,
    pub wr_bytes:  u64,
    pub rd_bytes:  u64,
}

/// Periodic byte accounting for a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsEvent {
    pub timestamp:   TimestampNs,
    pub conn_id:     ConnectionId,
    pub addr:        RemoteAddr,
    pub role:        Role,
    pub wr_bytes:    u64,
    pub rd_bytes:    u64,
    /// [`CONN_OPEN`] / [`CONN_CLOSE`] flags
    pub conn_events: u32,
}

impl StatsEvent {
    pub fn is_close(&self) -> bool {
        self.conn_events & CONN_CLOSE != 0
    }
}

/// One bounded fragment of an observed payload.
///
/// `msg_size` is the number of bytes this chunk stands for and
/// `msg_buf_size` the number actually carried in `payload`. They differ when
/// a payload exceeded the chunking bounds (or for sendfile, which carries no
/// bytes at all), so downstream can tell truncation from a short message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataChunkEvent {
    pub timestamp:     TimestampNs,
    pub conn_id:       ConnectionId,
    pub source_fn:     SourceFunction,
    pub protocol:      Protocol,
    pub role:          Role,
    pub direction:     Direction,
    pub ssl:           bool,
    /// Offset of the first byte within this direction of the stream
    pub pos:           u64,
    pub msg_size:      usize,
    pub msg_buf_size:  usize,
    /// The Kafka size prefix a previous read consumed, to be glued back in
    /// front of this payload
    pub length_header: Option<[u8; 4]>,
    pub payload:       Bytes,
}

impl DataChunkEvent {
    pub fn is_truncated(&self) -> bool {
        self.msg_buf_size < self.msg_size
    }
}
