//! Tracker configuration and trace control directives

use proto_infer::{Protocol, ProtocolSet};
use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Bounds on how much of an observed payload is forwarded.
///
/// Anything past these bounds is dropped by policy; the events say so
/// through their declared and copied sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLimits {
    /// Largest payload a single data chunk carries (default: 30720)
    pub max_chunk_size:     usize,
    /// Chunks a flat buffer may be split into (default: 4)
    pub max_chunks:         usize,
    /// Scatter/gather segments walked per observation (default: 42)
    pub max_segments:       usize,
    /// Leading segments searched for a non-empty one to classify (default: 3)
    pub inference_segments: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_chunk_size:     30720,
            max_chunks:         4,
            max_segments:       42,
            inference_segments: 3,
        }
    }
}

impl ChunkLimits {
    /// Largest number of payload bytes one flat buffer can yield.
    pub fn max_forwarded_bytes(&self) -> usize {
        self.max_chunk_size.saturating_mul(self.max_chunks)
    }
}

/// What to do when a new connection arrives at a full registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CapacityPolicy {
    /// Leave the registry alone and ignore the observation
    #[default]
    Reject,
    /// Drop the connection with the lowest generation to make room
    EvictOldest,
}

/// Static configuration for a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub chunk_limits:       ChunkLimits,
    /// Combined read+write bytes between two periodic stats reports
    /// (default: 65536)
    pub stats_threshold:    u64,
    /// Hard ceiling on tracked connections (default: 131072)
    pub max_connections:    usize,
    /// Largest number of entries a single cleanup sweep processes
    /// (default: 85)
    pub cleanup_batch_size: usize,
    pub capacity_policy:    CapacityPolicy,
    /// Detectors allowed to run (default: all)
    pub enabled_protocols:  ProtocolSet,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            chunk_limits:       ChunkLimits::default(),
            stats_threshold:    65536,
            max_connections:    131072,
            cleanup_batch_size: 85,
            capacity_policy:    CapacityPolicy::Reject,
            enabled_protocols:  ProtocolSet::all(),
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn with_chunk_limits(mut self, chunk_limits: ChunkLimits) -> Self {
        self.chunk_limits = chunk_limits;
        self
    }

    #[must_use]
    pub fn with_stats_threshold(mut self, stats_threshold: u64) -> Self {
        self.stats_threshold = stats_threshold;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, max_connections: usize, policy: CapacityPolicy) -> Self {
        self.max_connections = max_connections;
        self.capacity_policy = policy;
        self
    }

    #[must_use]
    pub fn with_enabled_protocols(mut self, enabled_protocols: ProtocolSet) -> Self {
        self.enabled_protocols = enabled_protocols;
        self
    }

    /// Reject bounds that would make the tracker unable to do any work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.chunk_limits;
        let bounds = [
            ("chunk_limits.max_chunk_size", limits.max_chunk_size as u64),
            ("chunk_limits.max_chunks", limits.max_chunks as u64),
            ("chunk_limits.max_segments", limits.max_segments as u64),
            ("chunk_limits.inference_segments", limits.inference_segments as u64),
            ("stats_threshold", self.stats_threshold),
            ("max_connections", self.max_connections as u64),
            ("cleanup_batch_size", self.cleanup_batch_size as u64),
        ];
        match bounds.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(ConfigError::for_field(ConfigErrorKind::ZeroBound, field)),
            None => Ok(()),
        }
    }
}

/// Which roles of a protocol have their data forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceMask(u8);

impl TraceMask {
    pub const DISABLED: TraceMask = TraceMask(0);
    pub const CLIENT: TraceMask = TraceMask(Role::Client as u8);
    pub const SERVER: TraceMask = TraceMask(Role::Server as u8);
    pub const BOTH: TraceMask = TraceMask(Role::Client as u8 | Role::Server as u8);

    /// An unresolved role never matches.
    pub fn allows(self, role: Role) -> bool {
        self.0 & role.bits() != 0
    }
}

/// The optional process filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetPid {
    /// No filter: protocol policy alone decides
    #[default]
    Unspecified,
    /// Explicitly trace every process by protocol policy
    All,
    /// Ignore every other process, force-trace this one
    Pid(u32),
}

/// Result of matching an observation's process against [`TargetPid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetMatch {
    Unspecified,
    All,
    Matched,
    Unmatched,
}

impl TargetPid {
    pub(crate) fn matches(self, pid: u32) -> TargetMatch {
        match self {
            TargetPid::Unspecified => TargetMatch::Unspecified,
            TargetPid::All => TargetMatch::All,
            TargetPid::Pid(target) if target == pid => TargetMatch::Matched,
            TargetPid::Pid(_) => TargetMatch::Unmatched,
        }
    }
}

/// Policy directives consumed by the data filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceControl {
    /// Indexed by [`Protocol::index`]
    pub protocol_masks: [TraceMask; Protocol::COUNT],
    /// The monitoring process itself; its traffic is never forwarded
    pub self_pid:       Option<u32>,
    pub target:         TargetPid,
}

impl Default for TraceControl {
    fn default() -> Self {
        Self::none()
    }
}

impl TraceControl {
    /// Forward no data; stats and lifecycle events are unaffected.
    pub fn none() -> Self {
        Self {
            protocol_masks: [TraceMask::DISABLED; Protocol::COUNT],
            self_pid:       None,
            target:         TargetPid::Unspecified,
        }
    }

    /// Forward data for both roles of every known protocol.
    pub fn trace_all_protocols() -> Self {
        let mut control = Self::none();
        for protocol in Protocol::ALL.into_iter().filter(|p| p.is_known()) {
            control.protocol_masks[protocol.index()] = TraceMask::BOTH;
        }
        control
    }

    #[must_use]
    pub fn with_mask(mut self, protocol: Protocol, mask: TraceMask) -> Self {
        self.protocol_masks[protocol.index()] = mask;
        self
    }

    #[must_use]
    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = Some(pid);
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: TargetPid) -> Self {
        self.target = target;
        self
    }

    pub fn mask(&self, protocol: Protocol) -> TraceMask {
        self.protocol_masks[protocol.index()]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mask(Protocol::Unknown) != TraceMask::DISABLED {
            return Err(ConfigError::for_field(
                ConfigErrorKind::UnknownProtocolMask,
                "protocol_masks",
            ));
        }
        if let (Some(self_pid), TargetPid::Pid(target)) = (self.self_pid, self.target)
            && self_pid == target
        {
            return Err(ConfigError::for_field(ConfigErrorKind::TargetIsSelf, "target"));
        }
        Ok(())
    }
}

/// Classification of configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A size, count or threshold is zero
    ZeroBound,
    /// A trace mask was set for `Protocol::Unknown`, which is never forwarded
    UnknownProtocolMask,
    /// The target process is the monitoring process itself
    TargetIsSelf,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroBound => write!(f, "bound must be greater than zero"),
            Self::UnknownProtocolMask => {
                write!(f, "trace mask set for the unknown protocol")
            },
            Self::TargetIsSelf => {
                write!(f, "target process is the monitoring process, whose data is never traced")
            },
        }
    }
}

/// Invalid tracker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub kind:  ConfigErrorKind,
    /// Offending configuration field
    pub field: Option<&'static str>,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind) -> Self {
        Self { kind, field: None }
    }

    pub fn for_field(kind: ConfigErrorKind, field: &'static str) -> Self {
        Self {
            kind,
            field: Some(field),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = self.field {
            write!(f, "[{field}] {}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for ConfigError {}
