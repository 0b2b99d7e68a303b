//! Line-oriented protocols terminated by CRLF: Redis (RESP) and NATS

use crate::types::MessageType;

const MIN_TEXT_MESSAGE_LEN: usize = 3;
const CRLF: &[u8] = b"\r\n";

/// RESP type markers: simple string, error, integer, bulk string, array.
const REDIS_TYPE_MARKERS: [u8; 5] = [b'+', b'-', b':', b'$', b'*'];

/// Whether `buf` looks like a single RESP value.
///
/// Requests and responses share one format, so no message type is reported;
/// the direction of traffic and the connection role decide it later.
pub fn is_redis_message(buf: &[u8]) -> bool {
    buf.len() >= MIN_TEXT_MESSAGE_LEN
        && REDIS_TYPE_MARKERS.contains(&buf[0])
        && buf.ends_with(CRLF)
}

const NATS_CLIENT_VERBS: [&[u8]; 4] = [b"CONNECT", b"SUB", b"UNSUB", b"PUB"];
const NATS_SERVER_VERBS: [&[u8]; 4] = [b"INFO", b"MSG", b"+OK", b"-ERR"];

/// Classify a NATS protocol line by its verb.
///
/// "Request" here only means the client sent it, "Response" that the server
/// did. PING and PONG flow both ways and stay unclassified.
pub fn infer_nats(buf: &[u8]) -> MessageType {
    if buf.len() < MIN_TEXT_MESSAGE_LEN || !buf.ends_with(CRLF) {
        return MessageType::Unknown;
    }

    if NATS_CLIENT_VERBS.iter().any(|verb| buf.starts_with(verb)) {
        return MessageType::Request;
    }
    if NATS_SERVER_VERBS.iter().any(|verb| buf.starts_with(verb)) {
        return MessageType::Response;
    }

    MessageType::Unknown
}
