//! Fuzz target: Structured observation sequences
//!
//! Generates sequences of observations over a handful of connection keys and
//! checks the tracker's bookkeeping invariants after every step.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use socket_tracker::{
    CapacityPolicy, ChunkLimits, ConnectionClosed, ConnectionId, ConnectionKey, ConnectionOpened,
    DataObserved, DataPayload, Direction, Observation, RemoteAddr, RoleHint, SendfileObserved,
    SourceFunction, SslDetected, TimestampNs, TraceControl, Tracker, TrackerConfig, TrackerEvent,
};

#[derive(Debug, Arbitrary)]
enum FuzzStep {
    Open {
        fd:     u8,
        hint:   u8,
        family: u8,
    },
    Data {
        fd:       u8,
        egress:   bool,
        ssl:      bool,
        payload:  Vec<u8>,
        /// Extra bytes the syscall claims beyond what was staged
        unstaged: u16,
        /// Split the payload into this many segments (0 = flat buffer)
        segments: u8,
    },
    Sendfile {
        fd:    u8,
        count: u16,
    },
    Ssl {
        fd: u8,
    },
    Close {
        fd: u8,
    },
    Cleanup {
        fd:         u8,
        generation: u8,
    },
    Disable {
        fd:         u8,
        generation: u8,
    },
}

#[derive(Debug, Arbitrary)]
struct FuzzSession {
    max_chunk_size:  u8,
    max_connections: u8,
    evict:           bool,
    steps:           Vec<FuzzStep>,
}

fn key(fd: u8) -> ConnectionKey {
    ConnectionKey::new(1, i32::from(fd % 8))
}

fn check(tracker: &Tracker, events: &[TrackerEvent]) {
    for event in events {
        if let TrackerEvent::DataChunk(chunk) = event {
            assert!(chunk.msg_buf_size <= chunk.msg_size);
            assert_eq!(chunk.payload.len(), chunk.msg_buf_size);
            assert!(chunk.msg_buf_size <= tracker.config().chunk_limits.max_chunk_size);
        }
    }
    assert!(tracker.len() <= tracker.config().max_connections);
}

fuzz_target!(|session: FuzzSession| {
    let limits = ChunkLimits {
        max_chunk_size: usize::from(session.max_chunk_size).max(1),
        ..ChunkLimits::default()
    };
    let policy = if session.evict {
        CapacityPolicy::EvictOldest
    } else {
        CapacityPolicy::Reject
    };
    let config = TrackerConfig::default()
        .with_chunk_limits(limits)
        .with_stats_threshold(256)
        .with_capacity(usize::from(session.max_connections % 8).max(1), policy);
    let Ok(tracker) = Tracker::new(config, TraceControl::trace_all_protocols()) else {
        return;
    };

    for (ts, step) in session.steps.iter().enumerate() {
        let timestamp = TimestampNs(ts as u64);
        let events = match step {
            FuzzStep::Open { fd, hint, family } => {
                let role_hint = match hint % 3 {
                    0 => RoleHint::Connect,
                    1 => RoleHint::Accept,
                    _ => RoleHint::Implicit,
                };
                let addr = match family % 3 {
                    0 => RemoteAddr::Inet(([10, 0, 0, *fd], 80).into()),
                    1 => RemoteAddr::Other { family: 1 },
                    _ => RemoteAddr::Unknown,
                };
                tracker.handle(Observation::Opened(ConnectionOpened {
                    key: key(*fd),
                    start_time_ticks: 0,
                    addr,
                    role_hint,
                    source_fn: SourceFunction::Connect,
                    timestamp,
                }))
            },
            FuzzStep::Data {
                fd,
                egress,
                ssl,
                payload,
                unstaged,
                segments,
            } => {
                let direction = if *egress {
                    Direction::Egress
                } else {
                    Direction::Ingress
                };
                let parts: Vec<&[u8]> = if *segments == 0 {
                    Vec::new()
                } else {
                    let size = payload.len().div_ceil(usize::from(*segments)).max(1);
                    payload.chunks(size).collect()
                };
                let data_payload = if *segments == 0 {
                    DataPayload::Buffer(payload)
                } else {
                    DataPayload::Segments(&parts)
                };
                tracker.handle(Observation::Data(DataObserved {
                    key: key(*fd),
                    start_time_ticks: 0,
                    direction,
                    byte_count: data_payload.staged_len() + usize::from(*unstaged),
                    payload: data_payload,
                    source_fn: SourceFunction::Write,
                    ssl: *ssl,
                    timestamp,
                }))
            },
            FuzzStep::Sendfile { fd, count } => {
                tracker.handle(Observation::Sendfile(SendfileObserved {
                    key: key(*fd),
                    start_time_ticks: 0,
                    byte_count: usize::from(*count),
                    timestamp,
                }))
            },
            FuzzStep::Ssl { fd } => tracker.handle(Observation::SslDetected(SslDetected {
                key:              key(*fd),
                start_time_ticks: 0,
            })),
            FuzzStep::Close { fd } => tracker.handle(Observation::Closed(ConnectionClosed {
                key: key(*fd),
                timestamp,
            })),
            FuzzStep::Cleanup { fd, generation } => {
                let batch = [ConnectionId {
                    key:              key(*fd),
                    start_time_ticks: 0,
                    generation:       u64::from(*generation),
                }];
                tracker.handle(Observation::CleanupSweep(&batch))
            },
            FuzzStep::Disable { fd, generation } => {
                tracker.disable_connection(key(*fd), u64::from(*generation));
                Vec::new()
            },
        };
        check(&tracker, &events);
    }
});
