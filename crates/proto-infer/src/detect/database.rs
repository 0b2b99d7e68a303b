//! Database wire protocols: Cassandra (CQL), MongoDB, PostgreSQL, MySQL

use super::{CarriedMatch, be_i32, le_i32};
use crate::carry::HeaderCarry;
use crate::types::MessageType;

// CQL frame header (9 bytes):
//
//   0         8        16        24        32         40
//   +---------+---------+---------+---------+---------+
//   | version |  flags  |      stream       | opcode  |
//   +---------+---------+---------+---------+---------+
//   |                length                 |
//   +---------+---------+---------+---------+
const CQL_HEADER_LEN: usize = 9;
/// Frames may be up to 256MB but inference only accepts common small ones.
const CQL_MAX_FRAME_LEN: i32 = 10_000;

const CQL_ERROR: u8 = 0x00;
const CQL_STARTUP: u8 = 0x01;
const CQL_READY: u8 = 0x02;
const CQL_AUTHENTICATE: u8 = 0x03;
const CQL_OPTIONS: u8 = 0x05;
const CQL_SUPPORTED: u8 = 0x06;
const CQL_QUERY: u8 = 0x07;
const CQL_RESULT: u8 = 0x08;
const CQL_PREPARE: u8 = 0x09;
const CQL_EXECUTE: u8 = 0x0a;
const CQL_REGISTER: u8 = 0x0b;
const CQL_EVENT: u8 = 0x0c;
const CQL_BATCH: u8 = 0x0d;
const CQL_AUTH_CHALLENGE: u8 = 0x0e;
const CQL_AUTH_RESPONSE: u8 = 0x0f;
const CQL_AUTH_SUCCESS: u8 = 0x10;

/// Classify a Cassandra native protocol frame (v3 to v5).
///
/// The high bit of the version byte marks the direction: client opcodes are
/// only accepted on request frames and server opcodes on response frames.
pub fn infer_cql(buf: &[u8]) -> MessageType {
    if buf.len() < CQL_HEADER_LEN {
        return MessageType::Unknown;
    }

    let is_request = buf[0] & 0x80 == 0;
    let version = buf[0] & 0x7f;
    let flags = buf[1];
    let opcode = buf[4];
    let Some(length) = be_i32(buf, 5) else {
        return MessageType::Unknown;
    };

    if !(3..=5).contains(&version) {
        return MessageType::Unknown;
    }
    // Only flag bits 0x1, 0x2, 0x4 and 0x8 are defined.
    if flags & 0xf0 != 0 {
        return MessageType::Unknown;
    }
    if length > CQL_MAX_FRAME_LEN {
        return MessageType::Unknown;
    }

    match opcode {
        CQL_STARTUP | CQL_OPTIONS | CQL_QUERY | CQL_PREPARE | CQL_EXECUTE | CQL_REGISTER
        | CQL_BATCH | CQL_AUTH_RESPONSE
            if is_request =>
        {
            MessageType::Request
        },
        CQL_ERROR | CQL_READY | CQL_AUTHENTICATE | CQL_SUPPORTED | CQL_RESULT | CQL_EVENT
        | CQL_AUTH_CHALLENGE | CQL_AUTH_SUCCESS
            if !is_request =>
        {
            MessageType::Response
        },
        _ => MessageType::Unknown,
    }
}

const MONGO_HEADER_LEN: i32 = 16;
const MONGO_REQUEST_OPCODES: [i32; 9] = [
    2001, // OP_UPDATE
    2002, // OP_INSERT
    2003, // reserved
    2004, // OP_QUERY
    2005, // OP_GET_MORE
    2006, // OP_DELETE
    2007, // OP_KILL_CURSORS
    2012, // OP_COMPRESSED
    2013, // OP_MSG
];

/// Classify a MongoDB request header.
///
/// Only requests are recognized. Response headers look too much like other
/// little-endian protocols (MySQL in particular) to classify reliably.
pub fn infer_mongo(buf: &[u8]) -> MessageType {
    if buf.len() < MONGO_HEADER_LEN as usize {
        return MessageType::Unknown;
    }

    let (Some(message_length), Some(request_id), Some(response_to), Some(opcode)) = (
        le_i32(buf, 0),
        le_i32(buf, 4),
        le_i32(buf, 8),
        le_i32(buf, 12),
    ) else {
        return MessageType::Unknown;
    };

    if message_length < MONGO_HEADER_LEN || request_id < 0 {
        return MessageType::Unknown;
    }

    if MONGO_REQUEST_OPCODES.contains(&opcode) && response_to == 0 {
        return MessageType::Request;
    }

    MessageType::Unknown
}

/// Length (4) + protocol version (4) + at least a 4-byte parameter key.
const PGSQL_STARTUP_MIN_LEN: i32 = 12;
const PGSQL_STARTUP_MAX_LEN: i32 = 10_240;
const PGSQL_VERSION_30: [u8; 4] = [0x00, 0x03, 0x00, 0x00];

/// Tag (1) + length (4).
const PGSQL_REGULAR_MIN_LEN: usize = 5;
const PGSQL_QUERY_TAG: u8 = b'Q';
/// Length counts itself; COPY/MOVE is the shortest command.
const PGSQL_QUERY_MIN_LEN: i32 = 8;
const PGSQL_QUERY_MAX_LEN: i32 = 30_000;

/// Classify a PostgreSQL frontend message: a v3.0 startup packet, or else a
/// simple `Q` query message.
pub fn infer_pgsql(buf: &[u8]) -> MessageType {
    match infer_pgsql_startup(buf) {
        MessageType::Unknown => infer_pgsql_query(buf),
        message_type => message_type,
    }
}

fn infer_pgsql_startup(buf: &[u8]) -> MessageType {
    if buf.len() < PGSQL_STARTUP_MIN_LEN as usize {
        return MessageType::Unknown;
    }

    let Some(length) = be_i32(buf, 0) else {
        return MessageType::Unknown;
    };
    if !(PGSQL_STARTUP_MIN_LEN..=PGSQL_STARTUP_MAX_LEN).contains(&length) {
        return MessageType::Unknown;
    }

    if buf[4..8] != PGSQL_VERSION_30 {
        return MessageType::Unknown;
    }

    // A parameter key such as "user" or "database" follows. The check is
    // deliberately loose: anything from 'A' up to the ASCII ceiling passes.
    if buf[8..11].iter().any(|&b| (b as i8) < b'A' as i8) {
        return MessageType::Unknown;
    }

    MessageType::Request
}

fn infer_pgsql_query(buf: &[u8]) -> MessageType {
    if buf.len() < PGSQL_REGULAR_MIN_LEN || buf[0] != PGSQL_QUERY_TAG {
        return MessageType::Unknown;
    }

    let Some(length) = be_i32(buf, 1) else {
        return MessageType::Unknown;
    };
    if !(PGSQL_QUERY_MIN_LEN..=PGSQL_QUERY_MAX_LEN).contains(&length) {
        return MessageType::Unknown;
    }

    // When the whole message is present its query string must be
    // NUL-terminated.
    let last = length as usize;
    if last < buf.len() && buf[last] != 0 {
        return MessageType::Unknown;
    }

    MessageType::Request
}

// MySQL packet:
//
//   0         8        16        24        32
//   +---------+---------+---------+---------+
//   |        payload_length       | seq_id  |
//   +---------+---------+---------+---------+
//   | command |     ... body ...            |
const MYSQL_MIN_PACKET_LEN: usize = 5;
const MYSQL_MAX_REQUEST_LEN: u32 = 10_000;

const MYSQL_COM_QUERY: u8 = 0x03;
const MYSQL_COM_CONNECT: u8 = 0x0b;
const MYSQL_COM_STMT_PREPARE: u8 = 0x16;
const MYSQL_COM_STMT_EXECUTE: u8 = 0x17;
const MYSQL_COM_STMT_CLOSE: u8 = 0x19;

/// Classify a MySQL client command packet.
///
/// When the previous observation on the connection was a lone 4-byte header
/// announcing exactly `buf.len()` bytes, that header is used and `buf` is
/// treated as the packet body.
pub fn infer_mysql(buf: &[u8], carry: &HeaderCarry) -> CarriedMatch {
    let carried = carry.carried_le(buf.len());
    let count = buf.len() + if carried.is_some() { 4 } else { 0 };
    if count < MYSQL_MIN_PACKET_LEN {
        return CarriedMatch::UNKNOWN;
    }

    let (header, command) = match carried {
        Some(header) => (header, buf[0]),
        None => ([buf[0], buf[1], buf[2], buf[3]], buf[4]),
    };

    let length = u32::from_le_bytes(header) & 0x00ff_ffff;
    let seq = header[3];

    let message_type = if seq != 0 || length == 0 || length > MYSQL_MAX_REQUEST_LEN {
        MessageType::Unknown
    } else {
        match command {
            MYSQL_COM_CONNECT
            | MYSQL_COM_QUERY
            | MYSQL_COM_STMT_PREPARE
            | MYSQL_COM_STMT_EXECUTE
            | MYSQL_COM_STMT_CLOSE => MessageType::Request,
            _ => MessageType::Unknown,
        }
    };

    CarriedMatch {
        message_type,
        used_carry: carried.is_some() && message_type.is_known(),
    }
}
