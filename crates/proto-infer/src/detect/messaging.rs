//! Binary messaging protocols: Kafka, AMQP 0-9-1, Finagle Mux

use super::{CarriedMatch, be_i16, be_i32, be_u16, be_u32};
use crate::carry::HeaderCarry;
use crate::types::MessageType;

/// length (4) + api_key (2) + api_version (2) + correlation_id (4)
const KAFKA_MIN_REQUEST_LEN: usize = 12;
const KAFKA_MAX_API_KEY: i16 = 62;
const KAFKA_MAX_API_VERSION: i16 = 12;

/// Classify a Kafka request (header v0 and later).
///
/// The payload must be exactly one message: the big-endian size prefix plus
/// four has to equal the observed length. Long messages split over several
/// reads are missed on purpose to keep false positives down.
///
/// Kafka brokers read the size prefix with its own syscall, so a previous
/// 4-byte observation whose big-endian value equals `buf.len()` is used as
/// the prefix and `buf` starts directly at the request header.
pub fn infer_kafka(buf: &[u8], carry: &HeaderCarry) -> CarriedMatch {
    let carried = carry.carried_be(buf.len());
    let count = buf.len() + if carried { 4 } else { 0 };
    if count < KAFKA_MIN_REQUEST_LEN {
        return CarriedMatch::UNKNOWN;
    }

    let message_size = if carried {
        Some(count as i64)
    } else {
        be_i32(buf, 0).map(|size| i64::from(size) + 4)
    };
    if message_size != Some(count as i64) {
        return CarriedMatch::UNKNOWN;
    }

    let header = if carried { buf } else { &buf[4..] };
    let message_type = infer_kafka_request(header);

    CarriedMatch {
        message_type,
        used_carry: carried && message_type.is_known(),
    }
}

fn infer_kafka_request(header: &[u8]) -> MessageType {
    let (Some(api_key), Some(api_version), Some(correlation_id)) =
        (be_i16(header, 0), be_i16(header, 2), be_i32(header, 4))
    else {
        return MessageType::Unknown;
    };

    if !(0..=KAFKA_MAX_API_KEY).contains(&api_key)
        || !(0..=KAFKA_MAX_API_VERSION).contains(&api_version)
        || correlation_id < 0
    {
        return MessageType::Unknown;
    }

    MessageType::Request
}

const AMQP_MIN_FRAME_LEN: usize = 8;
const AMQP_FRAME_METHOD: u8 = 1;

const AMQP_CLASS_CONNECTION: u16 = 10;
const AMQP_CLASS_BASIC: u16 = 60;

const AMQP_CONNECTION_START: u16 = 10;
const AMQP_CONNECTION_START_OK: u16 = 11;
const AMQP_BASIC_PUBLISH: u16 = 40;
const AMQP_BASIC_DELIVER: u16 = 60;

/// Classify an AMQP 0-9-1 method frame.
///
/// Frame layout: type (1), channel (2), size (4), then class id and method id
/// as big-endian u16 at offsets 7 and 9. Only the connection handshake and
/// publish/deliver pairs are recognized.
pub fn infer_amqp(buf: &[u8]) -> MessageType {
    if buf.len() < AMQP_MIN_FRAME_LEN || buf[0] != AMQP_FRAME_METHOD {
        return MessageType::Unknown;
    }

    // An 8..=10 byte frame is long enough to pass the size gate but too short
    // to carry a method id.
    let (Some(class_id), Some(method_id)) = (be_u16(buf, 7), be_u16(buf, 9)) else {
        return MessageType::Unknown;
    };

    match (class_id, method_id) {
        (AMQP_CLASS_CONNECTION, AMQP_CONNECTION_START) => MessageType::Request,
        (AMQP_CLASS_CONNECTION, AMQP_CONNECTION_START_OK) => MessageType::Response,
        (AMQP_CLASS_BASIC, AMQP_BASIC_PUBLISH) => MessageType::Request,
        (AMQP_CLASS_BASIC, AMQP_BASIC_DELIVER) => MessageType::Response,
        _ => MessageType::Unknown,
    }
}

const MUX_HEADER_LEN: usize = 8;
/// The "mux-framer" key of T/Rinit sits 6 bytes past the header.
const MUX_FRAMER_POS: usize = MUX_HEADER_LEN + 6;
const MUX_FRAMER: &[u8] = b"mux-framer";
const MUX_ERR_SUFFIX: &[u8] = b"check";
const MUX_MAX_TAG: u32 = (1 << 23) - 1;

const MUX_TDISPATCH: i8 = 2;
const MUX_RDISPATCH: i8 = -2;
const MUX_TINIT: i8 = 68;
const MUX_RINIT: i8 = -68;
const MUX_RERR: i8 = -128;
const MUX_RERR_OLD: i8 = 127;

/// Classify a Finagle Mux message.
///
/// Mux framing is loose enough to collide with plenty of binary traffic, so
/// only dispatch, init and error messages are recognized and the latter two
/// must carry their well-known payload markers.
pub fn infer_mux(buf: &[u8]) -> MessageType {
    if buf.len() < MUX_HEADER_LEN {
        return MessageType::Unknown;
    }

    let (Some(size), Some(type_and_tag)) = (be_i32(buf, 0), be_u32(buf, 4)) else {
        return MessageType::Unknown;
    };
    let length = i64::from(size) + 4;
    let mux_type = (type_and_tag >> 24) as u8 as i8;
    let tag = type_and_tag & 0x00ff_ffff;

    let message_type = match mux_type {
        MUX_TDISPATCH | MUX_TINIT | MUX_RERR_OLD => MessageType::Request,
        MUX_RDISPATCH | MUX_RINIT | MUX_RERR => MessageType::Response,
        _ => return MessageType::Unknown,
    };

    if matches!(mux_type, MUX_RERR | MUX_RERR_OLD) && !ends_with_err_suffix(buf, length) {
        return MessageType::Unknown;
    }

    if matches!(mux_type, MUX_TINIT | MUX_RINIT)
        && buf.get(MUX_FRAMER_POS..MUX_FRAMER_POS + MUX_FRAMER.len()) != Some(MUX_FRAMER)
    {
        return MessageType::Unknown;
    }

    if !(1..=MUX_MAX_TAG).contains(&tag) {
        return MessageType::Unknown;
    }

    message_type
}

/// The error message must end in "check" exactly where the declared frame
/// length says the frame ends.
fn ends_with_err_suffix(buf: &[u8], length: i64) -> bool {
    let Ok(end) = usize::try_from(length) else {
        return false;
    };
    let Some(start) = end.checked_sub(MUX_ERR_SUFFIX.len()) else {
        return false;
    };
    buf.get(start..end) == Some(MUX_ERR_SUFFIX)
}
