//! Protocol and message classification vocabulary

/// Application protocol spoken on a connection.
///
/// Discriminants are part of the outbound event format and must stay stable:
/// new protocols may be appended, existing values never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Protocol {
    /// Not (yet) classified
    #[default]
    Unknown = 0,
    Http    = 1,
    /// Reserved for the collector; never produced by the detectors here.
    Http2   = 2,
    Mysql   = 3,
    Cql     = 4,
    Pgsql   = 5,
    Dns     = 6,
    Redis   = 7,
    Nats    = 8,
    Mongo   = 9,
    Kafka   = 10,
    Mux     = 11,
    Amqp    = 12,
}

impl Protocol {
    /// Every protocol value, in discriminant order.
    pub const ALL: [Protocol; 13] = [
        Protocol::Unknown,
        Protocol::Http,
        Protocol::Http2,
        Protocol::Mysql,
        Protocol::Cql,
        Protocol::Pgsql,
        Protocol::Dns,
        Protocol::Redis,
        Protocol::Nats,
        Protocol::Mongo,
        Protocol::Kafka,
        Protocol::Mux,
        Protocol::Amqp,
    ];

    /// Number of protocol values, including `Unknown`.
    pub const COUNT: usize = Self::ALL.len();

    pub fn is_known(self) -> bool {
        self != Protocol::Unknown
    }

    /// Index suitable for per-protocol lookup tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Unknown => "unknown",
            Protocol::Http => "http",
            Protocol::Http2 => "http2",
            Protocol::Mysql => "mysql",
            Protocol::Cql => "cql",
            Protocol::Pgsql => "pgsql",
            Protocol::Dns => "dns",
            Protocol::Redis => "redis",
            Protocol::Nats => "nats",
            Protocol::Mongo => "mongo",
            Protocol::Kafka => "kafka",
            Protocol::Mux => "mux",
            Protocol::Amqp => "amqp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a classified payload looks like a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageType {
    #[default]
    Unknown,
    Request,
    Response,
}

impl MessageType {
    pub fn is_known(self) -> bool {
        self != MessageType::Unknown
    }
}

/// Result of running the detectors over one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InferredMessage {
    pub protocol:     Protocol,
    pub message_type: MessageType,
}

impl InferredMessage {
    /// Nothing matched.
    pub const UNKNOWN: InferredMessage = InferredMessage {
        protocol:     Protocol::Unknown,
        message_type: MessageType::Unknown,
    };

    pub fn new(protocol: Protocol, message_type: MessageType) -> Self {
        Self {
            protocol,
            message_type,
        }
    }
}

/// Set of protocols whose detectors are allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolSet(u32);

impl ProtocolSet {
    /// No detector runs; every payload stays `Unknown`.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every protocol that has a detector.
    pub fn all() -> Self {
        Protocol::ALL
            .iter()
            .filter(|p| !matches!(p, Protocol::Unknown | Protocol::Http2))
            .fold(Self::empty(), |set, &p| set.with(p))
    }

    pub fn only(protocols: &[Protocol]) -> Self {
        protocols
            .iter()
            .fold(Self::empty(), |set, &p| set.with(p))
    }

    #[must_use]
    pub fn with(self, protocol: Protocol) -> Self {
        Self(self.0 | (1 << protocol.index()))
    }

    #[must_use]
    pub fn without(self, protocol: Protocol) -> Self {
        Self(self.0 & !(1 << protocol.index()))
    }

    pub fn contains(self, protocol: Protocol) -> bool {
        self.0 & (1 << protocol.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self::all()
    }
}
