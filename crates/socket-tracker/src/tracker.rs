//! Dispatcher wiring observations through inference, filtering and emission

use proto_infer::InferenceEngine;

use crate::chunker::{ChunkHeader, Chunked, emit_data, emit_data_vectored};
use crate::config::{ConfigError, TargetMatch, TraceControl, TrackerConfig};
use crate::counters::{CounterSnapshot, TrackerCounters, add, bump};
use crate::event::{CloseEvent, OpenEvent, TrackerEvent};
use crate::filter::{ControlFilter, DataDecision};
use crate::observation::{
    ConnectionClosed, ConnectionOpened, DataObserved, DataPayload, Observation, SendfileObserved,
    SslDetected,
};
use crate::registry::{Admitted, CapacityExceeded, ConnectionRegistry, Removal};
use crate::role::role_from_hint;
use crate::state::{ConnectionSnapshot, ConnectionState};
use crate::stats::StatsAggregator;
use crate::types::{
    ConnectionId, ConnectionKey, Direction, RemoteAddr, Role, RoleHint, SourceFunction,
};

/// Tracks every observed connection and turns observations into events.
///
/// All methods take `&self`: observations for different keys may be fed
/// from different threads. Observations for one key must arrive in order.
pub struct Tracker {
    config:   TrackerConfig,
    engine:   InferenceEngine,
    registry: ConnectionRegistry,
    filter:   ControlFilter,
    stats:    StatsAggregator,
    counters: TrackerCounters,
}

impl Tracker {
    pub fn new(config: TrackerConfig, control: TraceControl) -> Result<Self, ConfigError> {
        config.validate()?;
        control.validate()?;
        Ok(Self {
            engine: InferenceEngine::new(config.enabled_protocols),
            registry: ConnectionRegistry::new(config.max_connections, config.capacity_policy),
            filter: ControlFilter::new(control),
            stats: StatsAggregator::new(config.stats_threshold),
            counters: TrackerCounters::default(),
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn trace_control(&self) -> &TraceControl {
        self.filter.control()
    }

    /// Process one observation and return the events it produced, in
    /// emission order.
    pub fn handle(&self, observation: Observation<'_>) -> Vec<TrackerEvent> {
        match observation {
            Observation::Opened(opened) => self.on_open(opened),
            Observation::Data(data) => self.on_data(data),
            Observation::Sendfile(sendfile) => self.on_sendfile(sendfile),
            Observation::Closed(closed) => self.on_close(closed),
            Observation::SslDetected(ssl) => {
                self.on_ssl(ssl);
                Vec::new()
            },
            Observation::CleanupSweep(batch) => {
                self.cleanup(batch);
                Vec::new()
            },
        }
    }

    /// A connection was set up.
    ///
    /// connect() and accept() always start a new incarnation of the key,
    /// replacing whatever was tracked under it. An implicit sighting only
    /// creates the connection if the key is not tracked yet.
    pub fn on_open(&self, opened: ConnectionOpened) -> Vec<TrackerEvent> {
        bump(&self.counters.observations);
        if self.admit_target(opened.key.pid).is_none() {
            return Vec::new();
        }

        let key = opened.key;
        let role = role_from_hint(opened.role_hint);
        let fresh = || {
            let conn_id = self.registry.new_conn_id(key, opened.start_time_ticks);
            ConnectionState::new(conn_id, opened.addr, role)
        };

        let admitted = self.registry.upsert(key, fresh, |state, created| {
            if created {
                return Some(state.conn_id);
            }
            match opened.role_hint {
                RoleHint::Implicit => None,
                RoleHint::Connect | RoleHint::Accept => {
                    let _replaced = state.conn_id;
                    *state = fresh();
                    crate::trace_debug!("{_replaced} replaced by {}", state.conn_id);
                    Some(state.conn_id)
                },
            }
        });
        let Some(Some(conn_id)) = self.admitted(key, admitted) else {
            return Vec::new();
        };

        if !opened.addr.is_traceable() {
            bump(&self.counters.non_inet_skipped);
            return Vec::new();
        }

        vec![TrackerEvent::ConnectionOpen(OpenEvent {
            timestamp: opened.timestamp,
            conn_id,
            source_fn: opened.source_fn,
            addr: opened.addr,
            role,
        })]
    }

    /// Bytes moved through a read/write family call.
    ///
    /// Creates the connection on first sight. Inference, data chunks and
    /// byte accounting only happen when the observation's TLS flag matches
    /// the connection's, so an SSL connection is tracked through its
    /// plaintext only.
    pub fn on_data(&self, data: DataObserved<'_>) -> Vec<TrackerEvent> {
        bump(&self.counters.observations);
        if data.byte_count == 0 {
            bump(&self.counters.empty_data);
            return Vec::new();
        }
        let Some(force) = self.admit_target(data.key.pid) else {
            return Vec::new();
        };

        let admitted = self.registry.upsert(
            data.key,
            || self.implicit_state(data.key, data.start_time_ticks),
            |state, _| self.process_data(state, &data, force),
        );
        self.admitted(data.key, admitted).unwrap_or_default()
    }

    /// sendfile() moved bytes out of the socket.
    ///
    /// The payload never passes through user memory, so the chunk only
    /// carries sizes and no inference happens.
    pub fn on_sendfile(&self, sendfile: SendfileObserved) -> Vec<TrackerEvent> {
        bump(&self.counters.observations);
        if sendfile.byte_count == 0 {
            bump(&self.counters.empty_data);
            return Vec::new();
        }
        let Some(force) = self.admit_target(sendfile.key.pid) else {
            return Vec::new();
        };

        let admitted = self.registry.upsert(
            sendfile.key,
            || self.implicit_state(sendfile.key, sendfile.start_time_ticks),
            |state, _| self.process_sendfile(state, &sendfile, force),
        );
        self.admitted(sendfile.key, admitted).unwrap_or_default()
    }

    /// The handle was closed: report and forget the connection.
    ///
    /// Connections of a filtered address family that never moved a byte
    /// leave silently.
    pub fn on_close(&self, closed: ConnectionClosed) -> Vec<TrackerEvent> {
        bump(&self.counters.observations);
        if self.admit_target(closed.key.pid).is_none() {
            return Vec::new();
        }

        let Some(mut state) = self.registry.remove(&closed.key) else {
            bump(&self.counters.lookup_miss);
            return Vec::new();
        };
        bump(&self.counters.connections_closed);

        if !state.addr.is_traceable() && state.total_bytes() == 0 {
            bump(&self.counters.non_inet_skipped);
            return Vec::new();
        }

        let close = CloseEvent {
            timestamp: closed.timestamp,
            conn_id:   state.conn_id,
            source_fn: SourceFunction::Close,
            wr_bytes:  state.wr_bytes,
            rd_bytes:  state.rd_bytes,
        };
        let stats = self.stats.report_close(&mut state, closed.timestamp);
        bump(&self.counters.stats_events);

        vec![
            TrackerEvent::ConnectionClose(close),
            TrackerEvent::ConnectionStats(stats),
        ]
    }

    /// Mark the connection as carrying TLS, creating it if needed.
    pub fn on_ssl(&self, ssl: SslDetected) {
        bump(&self.counters.observations);
        if self.admit_target(ssl.key.pid).is_none() {
            return;
        }

        let admitted = self.registry.upsert(
            ssl.key,
            || self.implicit_state(ssl.key, ssl.start_time_ticks),
            |state, _| state.ssl = true,
        );
        self.admitted(ssl.key, admitted);
    }

    /// Forget connections the collector is done with.
    ///
    /// An entry is only deleted while it is still the incarnation named in
    /// the batch, so a descriptor reused since then survives. At most
    /// `cleanup_batch_size` entries are processed per call; the rest are
    /// left for a later sweep. Returns the number of entries deleted.
    pub fn cleanup(&self, batch: &[ConnectionId]) -> usize {
        let (now, later) = batch.split_at(batch.len().min(self.config.cleanup_batch_size));
        add(&self.counters.cleanup_deferred, later.len() as u64);

        let mut removed = 0;
        for conn_id in now {
            match self.registry.remove_generation(conn_id) {
                Removal::Removed => {
                    removed += 1;
                    bump(&self.counters.cleanup_removed);
                },
                Removal::Stale => {
                    bump(&self.counters.cleanup_stale);
                    crate::trace_warn!("cleanup skipped {conn_id}: key has a newer incarnation");
                },
                Removal::Missing => bump(&self.counters.lookup_miss),
            }
        }
        removed
    }

    /// Stop forwarding data for incarnations of `key` up to and including
    /// `generation`. Returns false if the key is not tracked.
    pub fn disable_connection(&self, key: ConnectionKey, generation: u64) -> bool {
        let applied = self.registry.with_existing(&key, |state| {
            let up_to = state.disabled_up_to.map_or(generation, |g| g.max(generation));
            state.disabled_up_to = Some(up_to);
        });
        if applied.is_none() {
            bump(&self.counters.lookup_miss);
            return false;
        }
        crate::trace_debug!("data disabled for {key} up to generation {generation}");
        true
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn connection(&self, key: ConnectionKey) -> Option<ConnectionSnapshot> {
        self.registry.with_existing(&key, |state| state.snapshot())
    }

    /// Number of tracked connections
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Some(force)` if the observation should be processed at all.
    fn admit_target(&self, pid: u32) -> Option<bool> {
        match self.filter.target(pid) {
            TargetMatch::Unmatched => {
                bump(&self.counters.unmatched_target);
                None
            },
            TargetMatch::Matched => Some(true),
            TargetMatch::All | TargetMatch::Unspecified => Some(false),
        }
    }

    /// State for a connection first seen through its traffic.
    fn implicit_state(&self, key: ConnectionKey, start_time_ticks: u64) -> ConnectionState {
        let conn_id = self.registry.new_conn_id(key, start_time_ticks);
        ConnectionState::new(conn_id, RemoteAddr::Unknown, Role::Unknown)
    }

    /// Count the registry outcome and unwrap its value.
    fn admitted<R>(
        &self,
        _key: ConnectionKey,
        admitted: Result<Admitted<R>, CapacityExceeded>,
    ) -> Option<R> {
        match admitted {
            Ok(admitted) => {
                if admitted.created {
                    bump(&self.counters.connections_created);
                }
                if let Some(_evicted) = admitted.evicted {
                    bump(&self.counters.capacity_evicted);
                    crate::trace_warn!("registry full: evicted {_evicted} to admit {_key}");
                }
                Some(admitted.value)
            },
            Err(CapacityExceeded) => {
                bump(&self.counters.capacity_rejected);
                crate::trace_warn!("registry full: dropped observation for {_key}");
                None
            },
        }
    }

    fn process_data(
        &self,
        state: &mut ConnectionState,
        data: &DataObserved<'_>,
        force: bool,
    ) -> Vec<TrackerEvent> {
        if !state.addr.is_traceable() {
            bump(&self.counters.non_inet_skipped);
            return Vec::new();
        }
        if state.ssl != data.ssl {
            bump(&self.counters.ssl_mismatch);
            return Vec::new();
        }

        self.classify(state, data);

        let limits = &self.config.chunk_limits;
        let mut events = Vec::new();
        if self.forward(data.key.pid, force, state) {
            let header = ChunkHeader {
                timestamp:     data.timestamp,
                conn_id:       state.conn_id,
                source_fn:     data.source_fn,
                protocol:      state.protocol,
                role:          state.role,
                direction:     data.direction,
                ssl:           state.ssl,
                pos:           state.position(data.direction),
                length_header: state.carry.length_header(),
            };
            let chunked = match data.payload {
                DataPayload::Buffer(buf) => emit_data(&header, buf, data.byte_count, limits),
                DataPayload::Segments(segments) => {
                    emit_data_vectored(&header, segments, data.byte_count, limits)
                },
            };
            self.push_chunks(&mut events, chunked);
        }

        let moved = data.byte_count as u64;
        if let Some(stats) = self.stats.record(state, data.direction, moved, data.timestamp) {
            bump(&self.counters.stats_events);
            events.push(TrackerEvent::ConnectionStats(stats));
        }
        events
    }

    /// Classify the observation's first non-empty bytes.
    ///
    /// Scatter/gather calls are classified on the first non-empty segment
    /// among the leading `inference_segments`; if they are all empty the
    /// observation is not classified at all.
    fn classify(&self, state: &mut ConnectionState, data: &DataObserved<'_>) {
        // The length header belongs to one observation, even when this one
        // has no sample to classify.
        state.carry.clear_prepend();
        let clamp = |buf: &'_ [u8]| -> usize { buf.len().min(data.byte_count) };
        let sample = match data.payload {
            DataPayload::Buffer(buf) => Some(&buf[..clamp(buf)]),
            DataPayload::Segments(segments) => segments
                .iter()
                .take(self.config.chunk_limits.inference_segments)
                .map(|segment| &segment[..clamp(segment)])
                .find(|segment| !segment.is_empty()),
        };
        let Some(sample) = sample else {
            return;
        };

        let outcome = state.classify(&self.engine, data.direction, sample);
        if let Some(_protocol) = outcome.latched {
            bump(&self.counters.protocols_latched);
            crate::trace_debug!("{} speaks {_protocol}", state.conn_id);
        }
        if let Some(_role) = outcome.resolved {
            crate::trace_debug!("{} resolved as {_role:?}", state.conn_id);
        }
    }

    fn process_sendfile(
        &self,
        state: &mut ConnectionState,
        sendfile: &SendfileObserved,
        force: bool,
    ) -> Vec<TrackerEvent> {
        if !state.addr.is_traceable() {
            bump(&self.counters.non_inet_skipped);
            return Vec::new();
        }

        let mut events = Vec::new();
        if self.forward(sendfile.key.pid, force, state) {
            let header = ChunkHeader {
                timestamp:     sendfile.timestamp,
                conn_id:       state.conn_id,
                source_fn:     SourceFunction::Sendfile,
                protocol:      state.protocol,
                role:          state.role,
                direction:     Direction::Egress,
                ssl:           state.ssl,
                pos:           state.wr_bytes,
                length_header: None,
            };
            let chunk = header.metadata_only(sendfile.byte_count);
            let chunked = Chunked {
                truncated_bytes: chunk.msg_size as u64,
                chunks: vec![chunk],
                unreported_bytes: 0,
            };
            self.push_chunks(&mut events, chunked);
        }

        let moved = sendfile.byte_count as u64;
        if let Some(stats) =
            self.stats
                .record(state, Direction::Egress, moved, sendfile.timestamp)
        {
            bump(&self.counters.stats_events);
            events.push(TrackerEvent::ConnectionStats(stats));
        }
        events
    }

    fn forward(&self, pid: u32, force: bool, state: &ConnectionState) -> bool {
        match self.filter.decide(pid, force, state) {
            DataDecision::Send => true,
            _decision => {
                bump(&self.counters.data_filtered);
                false
            },
        }
    }

    fn push_chunks(&self, events: &mut Vec<TrackerEvent>, chunked: Chunked) {
        add(&self.counters.data_chunks, chunked.chunks.len() as u64);
        add(&self.counters.truncated_bytes, chunked.truncated_bytes);
        add(&self.counters.unreported_bytes, chunked.unreported_bytes);
        events.extend(chunked.chunks.into_iter().map(TrackerEvent::DataChunk));
    }
}
