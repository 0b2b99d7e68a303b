//! Per-protocol detectors
//!
//! Each detector is a pure function over the payload (and, for the two
//! split-header protocols, the connection's [`HeaderCarry`]). Out-of-range
//! fields and short buffers yield [`MessageType::Unknown`]; detectors never
//! panic and never index past the end of the payload.
//!
//! [`HeaderCarry`]: crate::HeaderCarry
//! [`MessageType::Unknown`]: crate::MessageType::Unknown

mod database;
mod dns;
mod http;
mod messaging;
mod text;

pub use database::{infer_cql, infer_mongo, infer_mysql, infer_pgsql};
pub use dns::infer_dns;
pub use http::infer_http;
pub use messaging::{infer_amqp, infer_kafka, infer_mux};
pub use text::{infer_nats, is_redis_message};

use crate::types::MessageType;

/// Outcome of a detector that may consume the carried 4-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarriedMatch {
    pub message_type: MessageType,
    /// The previous observation was used as this message's header
    pub used_carry:   bool,
}

impl CarriedMatch {
    pub(crate) const UNKNOWN: CarriedMatch = CarriedMatch {
        message_type: MessageType::Unknown,
        used_carry:   false,
    };
}

fn word_at(buf: &[u8], at: usize) -> Option<[u8; 4]> {
    buf.get(at..at.checked_add(4)?)?.try_into().ok()
}

fn half_at(buf: &[u8], at: usize) -> Option<[u8; 2]> {
    buf.get(at..at.checked_add(2)?)?.try_into().ok()
}

pub(crate) fn be_i32(buf: &[u8], at: usize) -> Option<i32> {
    word_at(buf, at).map(i32::from_be_bytes)
}

pub(crate) fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    word_at(buf, at).map(u32::from_be_bytes)
}

pub(crate) fn le_i32(buf: &[u8], at: usize) -> Option<i32> {
    word_at(buf, at).map(i32::from_le_bytes)
}

pub(crate) fn be_i16(buf: &[u8], at: usize) -> Option<i16> {
    half_at(buf, at).map(i16::from_be_bytes)
}

pub(crate) fn be_u16(buf: &[u8], at: usize) -> Option<u16> {
    half_at(buf, at).map(u16::from_be_bytes)
}
