// Socket connection tracking crate
// Follows observed sockets from open to close, classifies their protocol and
// emits lifecycle, stats and bounded data chunk events

mod chunker;
mod config;
mod counters;
mod event;
mod filter;
mod observation;
mod registry;
mod role;
mod state;
mod stats;
mod tracker;
mod types;

#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_debug;

pub use config::{
    CapacityPolicy, ChunkLimits, ConfigError, ConfigErrorKind, TargetPid, TraceControl, TraceMask,
    TrackerConfig,
};
pub use counters::{CounterSnapshot, TrackerCounters};
pub use event::{
    CONN_CLOSE, CONN_OPEN, CloseEvent, DataChunkEvent, OpenEvent, StatsEvent, TrackerEvent,
};
pub use observation::{
    ConnectionClosed, ConnectionOpened, DataObserved, DataPayload, Observation, SendfileObserved,
    SslDetected,
};
pub use proto_infer::{MessageType, Protocol, ProtocolSet};
pub use role::{role_from_hint, role_from_traffic};
pub use state::ConnectionSnapshot;
pub use tracker::Tracker;
pub use types::{
    ConnectionId, ConnectionKey, Direction, RemoteAddr, Role, RoleHint, SourceFunction,
    TimestampNs,
};

#[cfg(test)]
mod tests;
