#![allow(dead_code)]
//! Wire-format payload builders and observation helpers for tests

use socket_tracker::{
    ConnectionClosed, ConnectionKey, ConnectionOpened, DataObserved, Direction, RemoteAddr,
    RoleHint, SourceFunction, TimestampNs,
};

/// MySQL COM_QUERY command byte
pub const MYSQL_COM_QUERY: u8 = 0x03;

/// Kafka Metadata API key
pub const KAFKA_METADATA: i16 = 3;

/// Build a MySQL client packet: 3-byte LE length, sequence id, command, body
pub fn mysql_packet(seq: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let len = (body.len() + 1) as u32;
    let mut buf = len.to_le_bytes()[..3].to_vec();
    buf.push(seq);
    buf.push(command);
    buf.extend_from_slice(body);
    buf
}

/// Build a size-prefixed Kafka request with a one-byte client id
pub fn kafka_request(api_key: i16, api_version: i16, correlation_id: i32) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(&api_key.to_be_bytes());
    header.extend_from_slice(&api_version.to_be_bytes());
    header.extend_from_slice(&correlation_id.to_be_bytes());
    header.extend_from_slice(&[0x00, 0x01, b'x']);

    let mut buf = (header.len() as i32).to_be_bytes().to_vec();
    buf.extend_from_slice(&header);
    buf
}

/// Build a PostgreSQL simple query message
pub fn pgsql_query(sql: &str) -> Vec<u8> {
    let mut buf = vec![b'Q'];
    // Length counts itself and the NUL terminator
    buf.extend_from_slice(&((sql.len() + 5) as i32).to_be_bytes());
    buf.extend_from_slice(sql.as_bytes());
    buf.push(0);
    buf
}

/// Build a DNS message with one question for `name`
pub fn dns_message(id: u16, flags: u16, answers: u16, name: &str) -> Vec<u8> {
    let mut buf = id.to_be_bytes().to_vec();
    for field in [flags, 1, answers, 0, 0] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    for label in name.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    // Root label, QTYPE A, QCLASS IN
    buf.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
    buf
}

pub const DNS_QUERY_FLAGS: u16 = 0x0100;
pub const DNS_RESPONSE_FLAGS: u16 = 0x8180;

/// Encode a Redis command as a RESP array of bulk strings
pub fn redis_command(args: &[&str]) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n{arg}\r\n", arg.len()).as_bytes());
    }
    buf
}

pub fn http_request(method: &str, path: &str, host: &str) -> Vec<u8> {
    format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()
}

pub fn http_response(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} OK\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

pub fn inet(addr: &str) -> RemoteAddr {
    RemoteAddr::Inet(addr.parse().expect("valid socket address"))
}

pub fn opened(key: ConnectionKey, addr: RemoteAddr, role_hint: RoleHint, ts: u64) -> ConnectionOpened {
    let source_fn = match role_hint {
        RoleHint::Connect => SourceFunction::Connect,
        RoleHint::Accept => SourceFunction::Accept,
        RoleHint::Implicit => SourceFunction::SendTo,
    };
    ConnectionOpened {
        key,
        start_time_ticks: u64::from(key.pid) * 10,
        addr,
        role_hint,
        source_fn,
        timestamp: TimestampNs(ts),
    }
}

pub fn egress(key: ConnectionKey, buf: &[u8], ts: u64) -> DataObserved<'_> {
    DataObserved::buffer(key, Direction::Egress, buf, SourceFunction::Write, TimestampNs(ts))
}

pub fn ingress(key: ConnectionKey, buf: &[u8], ts: u64) -> DataObserved<'_> {
    DataObserved::buffer(key, Direction::Ingress, buf, SourceFunction::Read, TimestampNs(ts))
}

pub fn closed(key: ConnectionKey, ts: u64) -> ConnectionClosed {
    ConnectionClosed {
        key,
        timestamp: TimestampNs(ts),
    }
}
