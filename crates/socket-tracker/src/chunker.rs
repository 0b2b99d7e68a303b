//! Splitting observed payloads into bounded data chunks

use bytes::Bytes;
use proto_infer::Protocol;

use crate::config::ChunkLimits;
use crate::event::DataChunkEvent;
use crate::types::{ConnectionId, Direction, Role, SourceFunction, TimestampNs};

/// Attributes shared by every chunk cut from one observation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkHeader {
    pub(crate) timestamp:     TimestampNs,
    pub(crate) conn_id:       ConnectionId,
    pub(crate) source_fn:     SourceFunction,
    pub(crate) protocol:      Protocol,
    pub(crate) role:          Role,
    pub(crate) direction:     Direction,
    pub(crate) ssl:           bool,
    /// Stream offset of the observation's first byte
    pub(crate) pos:           u64,
    pub(crate) length_header: Option<[u8; 4]>,
}

impl ChunkHeader {
    fn chunk(&self, pos: u64, msg_size: usize, payload: &[u8], first: bool) -> DataChunkEvent {
        DataChunkEvent {
            timestamp: self.timestamp,
            conn_id: self.conn_id,
            source_fn: self.source_fn,
            protocol: self.protocol,
            role: self.role,
            direction: self.direction,
            ssl: self.ssl,
            pos,
            msg_size,
            msg_buf_size: payload.len(),
            // The carried header belongs in front of the observation, not
            // in front of every chunk of it.
            length_header: if first { self.length_header } else { None },
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// A chunk that only reports how many bytes moved (sendfile).
    pub(crate) fn metadata_only(&self, msg_size: usize) -> DataChunkEvent {
        self.chunk(self.pos, msg_size, &[], true)
    }
}

/// Chunks for one observation, plus what they could not carry.
#[derive(Debug, Default)]
pub(crate) struct Chunked {
    pub(crate) chunks:           Vec<DataChunkEvent>,
    /// Declared by a chunk but not copied into it
    pub(crate) truncated_bytes:  u64,
    /// Not covered by any chunk
    pub(crate) unreported_bytes: u64,
}

/// Split one flat buffer of `byte_count` bytes into at most
/// `max_chunks` chunks.
///
/// Every chunk but the last takes `min(remaining, max_chunk_size)`; the last
/// one declares everything still remaining but copies at most
/// `max_chunk_size`, so `pos + msg_size` of the final chunk always equals
/// the end of the observation.
pub(crate) fn emit_data(
    header: &ChunkHeader,
    buf: &[u8],
    byte_count: usize,
    limits: &ChunkLimits,
) -> Chunked {
    let mut out = Chunked::default();
    let mut sent = 0usize;
    let mut pos = header.pos;

    for i in 0..limits.max_chunks {
        let remaining = byte_count - sent;
        let is_last = i + 1 == limits.max_chunks;
        let current = if remaining > limits.max_chunk_size && !is_last {
            limits.max_chunk_size
        } else {
            remaining
        };
        if current == 0 {
            break;
        }

        let staged = buf.get(sent..).unwrap_or_default();
        let copied = current.min(limits.max_chunk_size).min(staged.len());
        out.chunks
            .push(header.chunk(pos, current, &staged[..copied], i == 0));
        out.truncated_bytes += (current - copied) as u64;

        sent += current;
        pos += current as u64;
    }

    out
}

/// Emit one chunk per non-empty segment, walking at most `max_segments`
/// segments and never more than `byte_count` bytes in total.
///
/// Each chunk declares the segment's share of `byte_count` and copies at
/// most `max_chunk_size` of it. Bytes past the segment bound get no chunk.
pub(crate) fn emit_data_vectored(
    header: &ChunkHeader,
    segments: &[&[u8]],
    byte_count: usize,
    limits: &ChunkLimits,
) -> Chunked {
    let mut out = Chunked::default();
    let mut sent = 0usize;
    let mut pos = header.pos;

    for segment in segments.iter().take(limits.max_segments) {
        if sent >= byte_count {
            break;
        }

        let segment_size = segment.len().min(byte_count - sent);
        if segment_size > 0 {
            let copied = segment_size.min(limits.max_chunk_size);
            let first = out.chunks.is_empty();
            out.chunks
                .push(header.chunk(pos, segment_size, &segment[..copied], first));
            out.truncated_bytes += (segment_size - copied) as u64;
        }

        sent += segment_size;
        pos += segment_size as u64;
    }

    out.unreported_bytes = (byte_count - sent) as u64;
    out
}
