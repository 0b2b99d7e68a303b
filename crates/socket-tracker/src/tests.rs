use super::*;
use rstest::rstest;

use crate::chunker::{ChunkHeader, emit_data, emit_data_vectored};

const PID: u32 = 4242;
const HTTP_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
const HTTP_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

fn key(fd: i32) -> ConnectionKey {
    ConnectionKey::new(PID, fd)
}

fn peer() -> RemoteAddr {
    RemoteAddr::Inet("10.0.0.1:8080".parse().unwrap())
}

fn tracker() -> Tracker {
    tracker_with(TrackerConfig::default(), TraceControl::trace_all_protocols())
}

fn tracker_with(config: TrackerConfig, control: TraceControl) -> Tracker {
    Tracker::new(config, control).expect("valid configuration")
}

fn opened(key: ConnectionKey, addr: RemoteAddr, role_hint: RoleHint) -> ConnectionOpened {
    let source_fn = match role_hint {
        RoleHint::Connect => SourceFunction::Connect,
        RoleHint::Accept => SourceFunction::Accept,
        RoleHint::Implicit => SourceFunction::SendTo,
    };
    ConnectionOpened {
        key,
        start_time_ticks: 77,
        addr,
        role_hint,
        source_fn,
        timestamp: TimestampNs(1_000),
    }
}

fn open(tracker: &Tracker, key: ConnectionKey, role_hint: RoleHint) -> Vec<TrackerEvent> {
    tracker.on_open(opened(key, peer(), role_hint))
}

fn write(tracker: &Tracker, key: ConnectionKey, buf: &[u8]) -> Vec<TrackerEvent> {
    tracker.on_data(DataObserved::buffer(
        key,
        Direction::Egress,
        buf,
        SourceFunction::Write,
        TimestampNs(2_000),
    ))
}

fn read(tracker: &Tracker, key: ConnectionKey, buf: &[u8]) -> Vec<TrackerEvent> {
    tracker.on_data(DataObserved::buffer(
        key,
        Direction::Ingress,
        buf,
        SourceFunction::Read,
        TimestampNs(3_000),
    ))
}

fn close(tracker: &Tracker, key: ConnectionKey) -> Vec<TrackerEvent> {
    tracker.on_close(ConnectionClosed {
        key,
        timestamp: TimestampNs(9_000),
    })
}

fn chunks(events: &[TrackerEvent]) -> Vec<&DataChunkEvent> {
    events.iter().filter_map(TrackerEvent::as_data_chunk).collect()
}

fn stats(events: &[TrackerEvent]) -> Vec<&StatsEvent> {
    events.iter().filter_map(TrackerEvent::as_stats).collect()
}

fn generation(tracker: &Tracker, key: ConnectionKey) -> u64 {
    tracker.connection(key).expect("tracked").conn_id.generation
}

fn chunk_header(pos: u64, length_header: Option<[u8; 4]>) -> ChunkHeader {
    ChunkHeader {
        timestamp: TimestampNs(5),
        conn_id: ConnectionId {
            key:              key(3),
            start_time_ticks: 0,
            generation:       1,
        },
        source_fn: SourceFunction::Write,
        protocol: Protocol::Http,
        role: Role::Client,
        direction: Direction::Egress,
        ssl: false,
        pos,
        length_header,
    }
}

// =========================================================================
// Role resolution
// =========================================================================

#[rstest]
#[case::egress_request(Direction::Egress, MessageType::Request, Role::Client)]
#[case::egress_response(Direction::Egress, MessageType::Response, Role::Server)]
#[case::ingress_request(Direction::Ingress, MessageType::Request, Role::Server)]
#[case::ingress_response(Direction::Ingress, MessageType::Response, Role::Client)]
#[case::egress_untyped(Direction::Egress, MessageType::Unknown, Role::Unknown)]
#[case::ingress_untyped(Direction::Ingress, MessageType::Unknown, Role::Unknown)]
fn test_role_from_traffic(
    #[case] direction: Direction,
    #[case] message_type: MessageType,
    #[case] expected: Role,
) {
    assert_eq!(role_from_traffic(direction, message_type), expected);
}

#[rstest]
#[case::connect(RoleHint::Connect, Role::Client)]
#[case::accept(RoleHint::Accept, Role::Server)]
#[case::implicit(RoleHint::Implicit, Role::Unknown)]
fn test_role_from_hint(#[case] hint: RoleHint, #[case] expected: Role) {
    assert_eq!(role_from_hint(hint), expected);
}

#[rstest]
#[case::disabled(TraceMask::DISABLED, [false, false, false])]
#[case::client(TraceMask::CLIENT, [true, false, false])]
#[case::server(TraceMask::SERVER, [false, true, false])]
#[case::both(TraceMask::BOTH, [true, true, false])]
fn test_trace_mask_allows(#[case] mask: TraceMask, #[case] expected: [bool; 3]) {
    let allowed = [Role::Client, Role::Server, Role::Unknown].map(|role| mask.allows(role));
    assert_eq!(allowed, expected);
}

// =========================================================================
// Configuration
// =========================================================================

#[rstest]
#[case::chunk_size(
    TrackerConfig::default().with_chunk_limits(ChunkLimits { max_chunk_size: 0, ..ChunkLimits::default() }),
    "chunk_limits.max_chunk_size"
)]
#[case::chunks(
    TrackerConfig::default().with_chunk_limits(ChunkLimits { max_chunks: 0, ..ChunkLimits::default() }),
    "chunk_limits.max_chunks"
)]
#[case::stats_threshold(TrackerConfig::default().with_stats_threshold(0), "stats_threshold")]
#[case::capacity(
    TrackerConfig::default().with_capacity(0, CapacityPolicy::Reject),
    "max_connections"
)]
#[case::cleanup(
    TrackerConfig { cleanup_batch_size: 0, ..TrackerConfig::default() },
    "cleanup_batch_size"
)]
fn test_config_rejects_zero_bounds(#[case] config: TrackerConfig, #[case] field: &str) {
    let err = config.validate().unwrap_err();
    assert_eq!(err.kind, ConfigErrorKind::ZeroBound);
    assert_eq!(err.field, Some(field));
    assert!(Tracker::new(config, TraceControl::none()).is_err());
}

#[test]
fn test_config_defaults() {
    let config = TrackerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.chunk_limits.max_forwarded_bytes(), 4 * 30720);
    assert_eq!(config.stats_threshold, 65536);
    assert_eq!(config.capacity_policy, CapacityPolicy::Reject);
    assert_eq!(config.enabled_protocols, ProtocolSet::all());
}

#[test]
fn test_trace_control_validation() {
    let err = TraceControl::none()
        .with_mask(Protocol::Unknown, TraceMask::BOTH)
        .validate()
        .unwrap_err();
    assert_eq!(err.kind, ConfigErrorKind::UnknownProtocolMask);

    let err = TraceControl::none()
        .with_self_pid(PID)
        .with_target(TargetPid::Pid(PID))
        .validate()
        .unwrap_err();
    assert_eq!(err.kind, ConfigErrorKind::TargetIsSelf);
    assert_eq!(err.to_string(), format!("[target] {}", ConfigErrorKind::TargetIsSelf));

    let control = TraceControl::trace_all_protocols();
    assert!(control.validate().is_ok());
    assert_eq!(control.mask(Protocol::Unknown), TraceMask::DISABLED);
    assert_eq!(control.mask(Protocol::Kafka), TraceMask::BOTH);
}

// =========================================================================
// Chunking
// =========================================================================

#[test]
fn test_emit_data_splits_into_bounded_chunks() {
    let limits = ChunkLimits::default();
    let byte_count = 4 * 30720 + 1000;
    let buf = vec![b'a'; byte_count];

    let out = emit_data(&chunk_header(500, None), &buf, byte_count, &limits);

    let sizes: Vec<_> = out.chunks.iter().map(|c| (c.msg_size, c.msg_buf_size)).collect();
    assert_eq!(
        sizes,
        vec![(30720, 30720), (30720, 30720), (30720, 30720), (31720, 30720)]
    );
    let positions: Vec<_> = out.chunks.iter().map(|c| c.pos).collect();
    assert_eq!(positions, vec![500, 31220, 61940, 92660]);

    let last = out.chunks.last().unwrap();
    assert_eq!(last.pos + last.msg_size as u64, 500 + byte_count as u64);
    assert!(last.is_truncated());
    assert_eq!(out.truncated_bytes, 1000);
    assert_eq!(out.unreported_bytes, 0);
}

#[rstest]
#[case::single(100, 100, vec![(100, 100)])]
#[case::exact_chunk(30720, 30720, vec![(30720, 30720)])]
#[case::one_past_chunk(30721, 30721, vec![(30720, 30720), (1, 1)])]
#[case::staged_short(50, 10, vec![(50, 10)])]
#[case::staged_across_chunks(40000, 30000, vec![(30720, 30000), (9280, 0)])]
#[case::nothing(0, 0, vec![])]
fn test_emit_data_sizes(
    #[case] byte_count: usize,
    #[case] staged: usize,
    #[case] expected: Vec<(usize, usize)>,
) {
    let buf = vec![0x5a; staged];
    let out = emit_data(&chunk_header(0, None), &buf, byte_count, &ChunkLimits::default());

    let sizes: Vec<_> = out.chunks.iter().map(|c| (c.msg_size, c.msg_buf_size)).collect();
    assert_eq!(sizes, expected);
    let carried: usize = out.chunks.iter().map(|c| c.payload.len()).sum();
    assert_eq!(out.truncated_bytes, (byte_count - carried) as u64);
}

#[test]
fn test_emit_data_length_header_on_first_chunk_only() {
    let buf = vec![0u8; 40000];
    let out = emit_data(
        &chunk_header(4, Some([0, 0, 0, 11])),
        &buf,
        buf.len(),
        &ChunkLimits::default(),
    );
    assert_eq!(out.chunks.len(), 2);
    assert_eq!(out.chunks[0].length_header, Some([0, 0, 0, 11]));
    assert_eq!(out.chunks[1].length_header, None);
}

#[test]
fn test_emit_data_vectored_one_chunk_per_segment() {
    let segments: [&[u8]; 4] = [b"hello", b"", b"gather", b"world"];
    let out = emit_data_vectored(&chunk_header(10, None), &segments, 16, &ChunkLimits::default());

    let summary: Vec<_> = out
        .chunks
        .iter()
        .map(|c| (c.pos, c.msg_size, c.payload.as_ref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (10, 5, b"hello".as_slice()),
            (15, 6, b"gather".as_slice()),
            (21, 5, b"world".as_slice()),
        ]
    );
    assert_eq!(out.unreported_bytes, 0);
}

#[test]
fn test_emit_data_vectored_stops_at_byte_count() {
    let segments: [&[u8]; 3] = [b"hello", b"gather", b"world"];
    let out = emit_data_vectored(&chunk_header(0, None), &segments, 8, &ChunkLimits::default());

    let sizes: Vec<_> = out.chunks.iter().map(|c| c.msg_size).collect();
    assert_eq!(sizes, vec![5, 3]);
    assert_eq!(out.chunks[1].payload.as_ref(), b"gat");
}

#[test]
fn test_emit_data_vectored_segment_bound() {
    let limits = ChunkLimits {
        max_segments: 2,
        ..ChunkLimits::default()
    };
    let segments: [&[u8]; 3] = [b"aaaa", b"bbbb", b"cccc"];
    let out = emit_data_vectored(&chunk_header(0, None), &segments, 12, &limits);

    assert_eq!(out.chunks.len(), 2);
    assert_eq!(out.unreported_bytes, 4);
}

#[test]
fn test_emit_data_vectored_caps_large_segment() {
    let limits = ChunkLimits {
        max_chunk_size: 4,
        ..ChunkLimits::default()
    };
    let segments: [&[u8]; 1] = [b"abcdefgh"];
    let out = emit_data_vectored(&chunk_header(0, None), &segments, 8, &limits);

    assert_eq!(out.chunks[0].msg_size, 8);
    assert_eq!(out.chunks[0].payload.as_ref(), b"abcd");
    assert_eq!(out.truncated_bytes, 4);
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn test_open_emits_event_with_hinted_role() {
    let tracker = tracker();
    let events = open(&tracker, key(3), RoleHint::Connect);

    let [TrackerEvent::ConnectionOpen(event)] = events.as_slice() else {
        panic!("expected one open event, got {events:?}");
    };
    assert_eq!(event.role, Role::Client);
    assert_eq!(event.addr, peer());
    assert_eq!(event.source_fn, SourceFunction::Connect);
    assert_eq!(event.conn_id.key, key(3));
    assert_eq!(event.conn_id.start_time_ticks, 77);
    assert_eq!(tracker.len(), 1);
}

#[test]
fn test_connect_replaces_existing_incarnation() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    write(&tracker, key(3), HTTP_REQUEST);
    let first = generation(&tracker, key(3));

    let events = open(&tracker, key(3), RoleHint::Accept);
    assert_eq!(events.len(), 1);

    let snapshot = tracker.connection(key(3)).unwrap();
    assert!(snapshot.conn_id.generation > first);
    assert_eq!(snapshot.role, Role::Server);
    assert_eq!(snapshot.wr_bytes, 0);
    assert_eq!(snapshot.protocol, Protocol::Unknown);
    assert_eq!(tracker.len(), 1);
}

#[test]
fn test_implicit_open_keeps_existing_connection() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    let first = generation(&tracker, key(3));

    assert!(open(&tracker, key(3), RoleHint::Implicit).is_empty());
    assert_eq!(generation(&tracker, key(3)), first);

    let events = open(&tracker, key(4), RoleHint::Implicit);
    let [TrackerEvent::ConnectionOpen(event)] = events.as_slice() else {
        panic!("expected one open event, got {events:?}");
    };
    assert_eq!(event.role, Role::Unknown);
}

#[test]
fn test_close_reports_and_forgets() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    write(&tracker, key(3), HTTP_REQUEST);
    read(&tracker, key(3), HTTP_RESPONSE);

    let events = close(&tracker, key(3));
    let [
        TrackerEvent::ConnectionClose(close_event),
        TrackerEvent::ConnectionStats(stats_event),
    ] = events.as_slice()
    else {
        panic!("expected close then stats, got {events:?}");
    };
    assert_eq!(close_event.source_fn, SourceFunction::Close);
    assert_eq!((close_event.wr_bytes, close_event.rd_bytes), (18, 19));
    assert_eq!(stats_event.conn_events, CONN_OPEN | CONN_CLOSE);
    assert!(stats_event.is_close());
    assert_eq!(stats_event.timestamp, TimestampNs(9_000));

    assert!(tracker.is_empty());
    assert_eq!(tracker.counters().connections_closed, 1);
}

#[test]
fn test_close_unknown_key() {
    let tracker = tracker();
    assert!(close(&tracker, key(3)).is_empty());
    assert_eq!(tracker.counters().lookup_miss, 1);
}

#[test]
fn test_non_inet_connection_is_tracked_silently() {
    let tracker = tracker();
    let unix = RemoteAddr::Other { family: 1 };

    assert!(tracker.on_open(opened(key(3), unix, RoleHint::Connect)).is_empty());
    assert_eq!(tracker.len(), 1);
    assert!(write(&tracker, key(3), HTTP_REQUEST).is_empty());
    assert!(close(&tracker, key(3)).is_empty());

    assert!(tracker.is_empty());
    assert_eq!(tracker.counters().non_inet_skipped, 3);
}

#[test]
fn test_unknown_family_is_traced() {
    let tracker = tracker();
    let events = read(&tracker, key(3), HTTP_REQUEST);

    // No open event for an implicit connection, but data flows
    let [TrackerEvent::DataChunk(chunk)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert_eq!(chunk.protocol, Protocol::Http);
    assert_eq!(chunk.role, Role::Server);
    assert_eq!(tracker.connection(key(3)).unwrap().addr, RemoteAddr::Unknown);
}

// =========================================================================
// Data path
// =========================================================================

#[test]
fn test_http_exchange_produces_chunks() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);

    let events = write(&tracker, key(3), HTTP_REQUEST);
    let [TrackerEvent::DataChunk(request)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert_eq!(request.protocol, Protocol::Http);
    assert_eq!(request.role, Role::Client);
    assert_eq!(request.direction, Direction::Egress);
    assert_eq!(request.source_fn, SourceFunction::Write);
    assert_eq!((request.pos, request.msg_size), (0, HTTP_REQUEST.len()));
    assert_eq!(request.payload.as_ref(), HTTP_REQUEST);
    assert_eq!(request.length_header, None);

    let events = read(&tracker, key(3), HTTP_RESPONSE);
    let chunks = chunks(&events);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].direction, Direction::Ingress);
    assert_eq!(chunks[0].pos, 0);

    let events = write(&tracker, key(3), HTTP_REQUEST);
    assert_eq!(chunks_pos(&events), vec![HTTP_REQUEST.len() as u64]);

    let snapshot = tracker.connection(key(3)).unwrap();
    assert_eq!((snapshot.wr_bytes, snapshot.rd_bytes), (36, 19));
    assert_eq!(tracker.counters().data_chunks, 3);
}

fn chunks_pos(events: &[TrackerEvent]) -> Vec<u64> {
    chunks(events).iter().map(|c| c.pos).collect()
}

#[test]
fn test_protocol_latches_once() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    write(&tracker, key(3), HTTP_REQUEST);
    // Valid DNS query on a connection that already speaks HTTP
    let dns = b"\x12\x34\x01\x00\x00\x01\x00\x00\x00\x00\x00\x00\x03www\x00\x00\x01\x00\x01";
    let events = write(&tracker, key(3), dns);

    assert_eq!(chunks(&events)[0].protocol, Protocol::Http);
    let snapshot = tracker.connection(key(3)).unwrap();
    assert_eq!(snapshot.protocol, Protocol::Http);
    assert_eq!(snapshot.protocol_total_count, 2);
    assert_eq!(snapshot.protocol_match_count, 1);
    assert_eq!(tracker.counters().protocols_latched, 1);
}

#[test]
fn test_role_resolves_from_first_typed_message() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Implicit);
    assert_eq!(tracker.connection(key(3)).unwrap().role, Role::Unknown);

    // Redis is untyped and says nothing about the role
    write(&tracker, key(3), b"*1\r\n$4\r\nPING\r\n");
    let snapshot = tracker.connection(key(3)).unwrap();
    assert_eq!(snapshot.protocol, Protocol::Redis);
    assert_eq!(snapshot.role, Role::Unknown);

    // Role never changes once resolved
    let tracker = self::tracker();
    read(&tracker, key(4), HTTP_RESPONSE);
    write(&tracker, key(4), HTTP_RESPONSE);
    assert_eq!(tracker.connection(key(4)).unwrap().role, Role::Client);
}

#[test]
fn test_empty_data_is_ignored() {
    let tracker = tracker();
    assert!(write(&tracker, key(3), b"").is_empty());
    assert!(tracker.is_empty());
    assert_eq!(tracker.counters().empty_data, 1);
}

#[test]
fn test_ssl_flag_must_match() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    tracker.on_ssl(SslDetected {
        key:              key(3),
        start_time_ticks: 77,
    });

    // Ciphertext seen at the socket layer
    assert!(write(&tracker, key(3), HTTP_REQUEST).is_empty());
    assert_eq!(tracker.counters().ssl_mismatch, 1);

    let plaintext = DataObserved::buffer(
        key(3),
        Direction::Egress,
        HTTP_REQUEST,
        SourceFunction::SslWrite,
        TimestampNs(2_000),
    )
    .with_ssl(true);
    let events = tracker.on_data(plaintext);
    let [TrackerEvent::DataChunk(chunk)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert!(chunk.ssl);
    assert_eq!(chunk.source_fn, SourceFunction::SslWrite);

    // Only the plaintext was accounted
    assert_eq!(tracker.connection(key(3)).unwrap().wr_bytes, 18);
}

#[test]
fn test_tls_data_on_plain_connection_is_ignored() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    let data = DataObserved::buffer(
        key(3),
        Direction::Egress,
        HTTP_REQUEST,
        SourceFunction::SslWrite,
        TimestampNs(2_000),
    )
    .with_ssl(true);

    assert!(tracker.on_data(data).is_empty());
    assert_eq!(tracker.connection(key(3)).unwrap().wr_bytes, 0);
}

#[test]
fn test_vectored_inference_uses_first_non_empty_segment() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    let segments: [&[u8]; 3] = [b"", b"GET / HTTP/1.1\r\n", b"\r\n"];
    let data = DataObserved::segments(
        key(3),
        Direction::Egress,
        &segments,
        SourceFunction::Writev,
        TimestampNs(2_000),
    );

    let events = tracker.on_data(data);
    let chunks = chunks(&events);
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.protocol == Protocol::Http));
    assert_eq!(chunks_pos(&events), vec![0, 16]);
}

#[test]
fn test_vectored_inference_gives_up_after_leading_segments() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    let segments: [&[u8]; 4] = [b"", b"", b"", HTTP_REQUEST];
    let data = DataObserved::segments(
        key(3),
        Direction::Egress,
        &segments,
        SourceFunction::Writev,
        TimestampNs(2_000),
    );

    assert!(chunks(&tracker.on_data(data)).is_empty());
    let snapshot = tracker.connection(key(3)).unwrap();
    assert_eq!(snapshot.protocol, Protocol::Unknown);
    assert_eq!(snapshot.protocol_total_count, 0);
    assert_eq!(snapshot.wr_bytes, 18);
}

#[test]
fn test_kafka_split_header_is_reattached() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Accept);
    let header = [0x00, 0x00, 0x00, 0x0b];
    let body = [0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x01, b'x'];

    assert!(chunks(&read(&tracker, key(3), &header)).is_empty());
    let events = read(&tracker, key(3), &body);
    let [TrackerEvent::DataChunk(chunk)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert_eq!(chunk.protocol, Protocol::Kafka);
    assert_eq!(chunk.pos, 4);
    assert_eq!(chunk.length_header, Some(header));

    let events = read(&tracker, key(3), &body);
    assert_eq!(chunks(&events)[0].length_header, None);
}

#[test]
fn test_kafka_length_header_not_repeated_without_sample() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Accept);
    let header = [0x00, 0x00, 0x00, 0x0b];
    let body = [0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x01, b'x'];

    read(&tracker, key(3), &header);
    let events = read(&tracker, key(3), &body);
    assert_eq!(chunks(&events)[0].length_header, Some(header));

    let segments: [&[u8]; 4] = [b"", b"", b"", &body];
    let events = tracker.on_data(DataObserved::segments(
        key(3),
        Direction::Ingress,
        &segments,
        SourceFunction::Readv,
        TimestampNs(4_000),
    ));
    let chunks = chunks(&events);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].protocol, Protocol::Kafka);
    assert_eq!(chunks[0].length_header, None);
}

#[test]
fn test_sendfile_reports_size_only() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Accept);
    read(&tracker, key(3), HTTP_REQUEST);
    write(&tracker, key(3), HTTP_RESPONSE);

    let events = tracker.on_sendfile(SendfileObserved {
        key:              key(3),
        start_time_ticks: 77,
        byte_count:       5000,
        timestamp:        TimestampNs(4_000),
    });
    let [TrackerEvent::DataChunk(chunk)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert_eq!(chunk.source_fn, SourceFunction::Sendfile);
    assert_eq!(chunk.direction, Direction::Egress);
    assert_eq!(chunk.pos, HTTP_RESPONSE.len() as u64);
    assert_eq!((chunk.msg_size, chunk.msg_buf_size), (5000, 0));
    assert!(chunk.payload.is_empty());

    assert_eq!(tracker.connection(key(3)).unwrap().wr_bytes, 5019);
}

// =========================================================================
// Stats
// =========================================================================

#[test]
fn test_stats_after_threshold_then_close() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);

    let events = write(&tracker, key(3), &vec![b'x'; 70000]);
    let reports = stats(&events);
    let [report] = reports.as_slice() else {
        panic!("expected one stats event, got {events:?}");
    };
    assert_eq!((report.wr_bytes, report.rd_bytes), (70000, 0));
    assert_eq!(report.conn_events, CONN_OPEN);
    assert_eq!(report.role, Role::Client);

    let events = close(&tracker, key(3));
    let reports = stats(&events);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].conn_events, CONN_CLOSE);
    assert_eq!(tracker.counters().stats_events, 2);
}

#[test]
fn test_stats_threshold_counts_both_directions() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);

    assert!(stats(&write(&tracker, key(3), &vec![b'x'; 40000])).is_empty());
    let events = read(&tracker, key(3), &vec![b'y'; 30000]);
    assert_eq!(stats(&events).len(), 1);

    // The next report needs another full threshold
    assert!(stats(&read(&tracker, key(3), &vec![b'y'; 65535])).is_empty());
    assert_eq!(stats(&read(&tracker, key(3), b"y")).len(), 1);
    assert_eq!(tracker.connection(key(3)).unwrap().last_reported_bytes, 135536);
}

#[test]
fn test_stats_reported_without_data_forwarding() {
    let tracker = tracker_with(TrackerConfig::default(), TraceControl::none());
    open(&tracker, key(3), RoleHint::Connect);

    let mut request = HTTP_REQUEST.to_vec();
    request.resize(70000, b'a');
    let events = write(&tracker, key(3), &request);

    assert!(chunks(&events).is_empty());
    assert_eq!(stats(&events).len(), 1);
    assert_eq!(tracker.counters().data_filtered, 1);
}

// =========================================================================
// Data filter
// =========================================================================

#[test]
fn test_mask_selects_role() {
    let control = TraceControl::none().with_mask(Protocol::Http, TraceMask::CLIENT);
    let tracker = tracker_with(TrackerConfig::default(), control);

    open(&tracker, key(3), RoleHint::Connect);
    open(&tracker, key(4), RoleHint::Accept);

    assert_eq!(chunks(&write(&tracker, key(3), HTTP_REQUEST)).len(), 1);
    assert!(chunks(&read(&tracker, key(4), HTTP_REQUEST)).is_empty());
    assert_eq!(tracker.counters().data_filtered, 1);
}

#[test]
fn test_unknown_protocol_is_not_forwarded() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    assert!(chunks(&write(&tracker, key(3), b"\x00\x01\x02")).is_empty());
}

#[test]
fn test_target_pid_filters_and_forces() {
    let control = TraceControl::none().with_target(TargetPid::Pid(PID));
    let tracker = tracker_with(TrackerConfig::default(), control);

    let other = ConnectionKey::new(PID + 1, 3);
    assert!(tracker.on_open(opened(other, peer(), RoleHint::Connect)).is_empty());
    assert!(write(&tracker, other, HTTP_REQUEST).is_empty());
    assert!(tracker.connection(other).is_none());
    assert_eq!(tracker.counters().unmatched_target, 2);

    open(&tracker, key(3), RoleHint::Connect);
    // Forced through even though nothing is classified or masked in
    let events = write(&tracker, key(3), b"\x00\x01\x02");
    let [TrackerEvent::DataChunk(chunk)] = events.as_slice() else {
        panic!("expected one data chunk, got {events:?}");
    };
    assert_eq!(chunk.protocol, Protocol::Unknown);
}

#[test]
fn test_self_pid_is_never_forwarded() {
    let control = TraceControl::trace_all_protocols().with_self_pid(PID);
    let tracker = tracker_with(TrackerConfig::default(), control);

    open(&tracker, key(3), RoleHint::Connect);
    assert!(chunks(&write(&tracker, key(3), HTTP_REQUEST)).is_empty());
    // Still tracked and accounted
    assert_eq!(tracker.connection(key(3)).unwrap().wr_bytes, 18);
}

#[test]
fn test_disable_connection_up_to_generation() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    let current = generation(&tracker, key(3));

    assert!(tracker.disable_connection(key(3), current));
    assert!(chunks(&write(&tracker, key(3), HTTP_REQUEST)).is_empty());
    assert_eq!(tracker.connection(key(3)).unwrap().disabled_up_to, Some(current));

    // A lower generation never lowers the bound
    assert!(tracker.disable_connection(key(3), current - 1));
    assert_eq!(tracker.connection(key(3)).unwrap().disabled_up_to, Some(current));

    assert!(!tracker.disable_connection(key(9), current));
    assert_eq!(tracker.counters().lookup_miss, 1);
}

// =========================================================================
// Registry capacity and cleanup
// =========================================================================

#[test]
fn test_capacity_reject() {
    let config = TrackerConfig::default().with_capacity(1, CapacityPolicy::Reject);
    let tracker = tracker_with(config, TraceControl::trace_all_protocols());

    open(&tracker, key(3), RoleHint::Connect);
    assert!(open(&tracker, key(4), RoleHint::Connect).is_empty());
    assert!(write(&tracker, key(5), HTTP_REQUEST).is_empty());

    assert_eq!(tracker.len(), 1);
    assert!(tracker.connection(key(3)).is_some());
    assert_eq!(tracker.counters().capacity_rejected, 2);

    // Existing connections keep working
    assert_eq!(chunks(&write(&tracker, key(3), HTTP_REQUEST)).len(), 1);

    // A freed slot can be reused
    close(&tracker, key(3));
    assert_eq!(open(&tracker, key(4), RoleHint::Connect).len(), 1);
}

#[test]
fn test_capacity_evict_oldest() {
    let config = TrackerConfig::default().with_capacity(2, CapacityPolicy::EvictOldest);
    let tracker = tracker_with(config, TraceControl::trace_all_protocols());

    open(&tracker, key(3), RoleHint::Connect);
    open(&tracker, key(4), RoleHint::Connect);
    assert_eq!(open(&tracker, key(5), RoleHint::Connect).len(), 1);

    assert_eq!(tracker.len(), 2);
    assert!(tracker.connection(key(3)).is_none());
    assert!(tracker.connection(key(4)).is_some());
    assert_eq!(tracker.counters().capacity_evicted, 1);
}

#[test]
fn test_cleanup_respects_generation() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    open(&tracker, key(4), RoleHint::Connect);
    let stale = tracker.connection(key(3)).unwrap().conn_id;
    let current = tracker.connection(key(4)).unwrap().conn_id;

    // Descriptor 3 is reused before the sweep arrives
    open(&tracker, key(3), RoleHint::Connect);
    let missing = ConnectionId {
        key: key(9),
        ..current
    };

    let removed = tracker.handle(Observation::CleanupSweep(&[stale, current, missing]));
    assert!(removed.is_empty());

    assert!(tracker.connection(key(3)).is_some());
    assert!(tracker.connection(key(4)).is_none());
    let counters = tracker.counters();
    assert_eq!(counters.cleanup_removed, 1);
    assert_eq!(counters.cleanup_stale, 1);
    assert_eq!(counters.lookup_miss, 1);
}

#[test]
fn test_cleanup_batch_bound() {
    let config = TrackerConfig {
        cleanup_batch_size: 2,
        ..TrackerConfig::default()
    };
    let tracker = tracker_with(config, TraceControl::trace_all_protocols());
    let ids: Vec<_> = (0..3)
        .map(|fd| {
            open(&tracker, key(fd), RoleHint::Connect);
            tracker.connection(key(fd)).unwrap().conn_id
        })
        .collect();

    assert_eq!(tracker.cleanup(&ids), 2);
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.counters().cleanup_deferred, 1);

    assert_eq!(tracker.cleanup(&ids[2..]), 1);
    assert!(tracker.is_empty());
}

#[test]
fn test_generations_are_unique_across_keys() {
    let tracker = tracker();
    open(&tracker, key(3), RoleHint::Connect);
    open(&tracker, key(4), RoleHint::Connect);
    open(&tracker, key(3), RoleHint::Connect);

    let a = generation(&tracker, key(3));
    let b = generation(&tracker, key(4));
    assert_ne!(a, b);
    assert!(a > b);
}

// =========================================================================
// Serialization
// =========================================================================

#[test]
fn test_events_serialize() {
    let tracker = tracker();
    let events = open(&tracker, key(3), RoleHint::Connect);

    let value = serde_json::to_value(&events[0]).unwrap();
    let open_event = &value["ConnectionOpen"];
    assert_eq!(open_event["role"], "Client");
    assert_eq!(open_event["timestamp"], 1_000);
    assert_eq!(open_event["conn_id"]["key"]["pid"], PID);
    assert_eq!(open_event["addr"]["Inet"], "10.0.0.1:8080");

    let events = write(&tracker, key(3), HTTP_REQUEST);
    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["DataChunk"]["protocol"], "Http");
    assert_eq!(value["DataChunk"]["msg_size"], 18);

    let counters = serde_json::to_value(tracker.counters()).unwrap();
    assert_eq!(counters["connections_created"], 1);
    assert_eq!(counters["data_chunks"], 1);
}

#[test]
fn test_display_formats() {
    let conn_id = ConnectionId {
        key:              key(3),
        start_time_ticks: 0,
        generation:       12,
    };
    assert_eq!(conn_id.to_string(), "4242:3#12");
    assert_eq!(TimestampNs(15).to_string(), "15ns");
    assert_eq!(
        ConfigError::for_field(ConfigErrorKind::ZeroBound, "stats_threshold").to_string(),
        "[stats_threshold] bound must be greater than zero"
    );
}
