use crate::carry::HeaderCarry;
use crate::detect;
use crate::types::{InferredMessage, MessageType, Protocol, ProtocolSet};

/// Order in which detectors are tried. The first one to report a known
/// message type wins (Redis wins on a bare match since it reports no type).
pub const DETECTION_ORDER: [Protocol; 11] = [
    Protocol::Http,
    Protocol::Cql,
    Protocol::Mongo,
    Protocol::Pgsql,
    Protocol::Mysql,
    Protocol::Kafka,
    Protocol::Amqp,
    Protocol::Dns,
    Protocol::Redis,
    Protocol::Mux,
    Protocol::Nats,
];

/// Runs the enabled detectors over one payload.
///
/// The engine itself is stateless and can be shared between threads; all
/// per-connection memory lives in the caller's [`HeaderCarry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InferenceEngine {
    enabled: ProtocolSet,
}

impl InferenceEngine {
    pub fn new(enabled: ProtocolSet) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> ProtocolSet {
        self.enabled
    }

    /// Classify `buf`, one observed syscall worth of bytes.
    ///
    /// `latched` is the protocol already assigned to the connection. Once a
    /// connection is known to speak MongoDB no detector runs any more, since
    /// Mongo bodies routinely look like other protocols.
    ///
    /// The carry always records `buf` on the way out, whether or not anything
    /// matched, and its prepend flag only describes this call.
    pub fn infer(
        &self,
        buf: &[u8],
        carry: &mut HeaderCarry,
        latched: Protocol,
    ) -> InferredMessage {
        carry.clear_prepend();

        let inferred = if latched == Protocol::Mongo {
            InferredMessage::UNKNOWN
        } else {
            self.run_detectors(buf, carry, latched)
        };

        carry.record(buf);
        inferred
    }

    fn run_detectors(
        &self,
        buf: &[u8],
        carry: &mut HeaderCarry,
        latched: Protocol,
    ) -> InferredMessage {
        for protocol in DETECTION_ORDER {
            if !self.enabled.contains(protocol) {
                continue;
            }

            let message_type = match protocol {
                Protocol::Http => detect::infer_http(buf),
                Protocol::Cql => detect::infer_cql(buf),
                Protocol::Mongo => detect::infer_mongo(buf),
                Protocol::Pgsql => detect::infer_pgsql(buf),
                Protocol::Mysql => detect::infer_mysql(buf, carry).message_type,
                Protocol::Kafka => {
                    let matched = detect::infer_kafka(buf, carry);
                    // The header was consumed by an earlier read; downstream
                    // needs it back to frame the first message.
                    if matched.used_carry
                        && matched.message_type == MessageType::Request
                        && latched == Protocol::Unknown
                    {
                        carry.set_prepend();
                    }
                    matched.message_type
                },
                Protocol::Amqp => detect::infer_amqp(buf),
                Protocol::Dns => detect::infer_dns(buf),
                Protocol::Redis => {
                    if detect::is_redis_message(buf) {
                        return InferredMessage::new(Protocol::Redis, MessageType::Unknown);
                    }
                    MessageType::Unknown
                },
                Protocol::Mux => detect::infer_mux(buf),
                Protocol::Nats => detect::infer_nats(buf),
                Protocol::Unknown | Protocol::Http2 => MessageType::Unknown,
            };

            if message_type.is_known() {
                return InferredMessage::new(protocol, message_type);
            }
        }

        InferredMessage::UNKNOWN
    }
}
