//! Per-connection state

use proto_infer::{HeaderCarry, InferenceEngine, Protocol};
use serde::Serialize;

use crate::role::role_from_traffic;
use crate::types::{ConnectionId, Direction, RemoteAddr, Role};

/// Mutable state of one live connection incarnation.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionState {
    pub(crate) conn_id:              ConnectionId,
    pub(crate) addr:                 RemoteAddr,
    /// Latched: Unknown until the first classification, then fixed
    pub(crate) protocol:             Protocol,
    /// Latched: Unknown until a hint or the first typed message
    pub(crate) role:                 Role,
    pub(crate) ssl:                  bool,
    pub(crate) wr_bytes:             u64,
    pub(crate) rd_bytes:             u64,
    /// wr_bytes + rd_bytes at the last stats report
    pub(crate) last_reported_bytes:  u64,
    /// A stats event has been emitted for this incarnation
    pub(crate) stats_reported:       bool,
    pub(crate) protocol_match_count: u64,
    pub(crate) protocol_total_count: u64,
    pub(crate) carry:                HeaderCarry,
    /// Data of generations up to and including this one is not forwarded
    pub(crate) disabled_up_to:       Option<u64>,
}

/// What a classification attempt changed on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Classification {
    pub(crate) latched:  Option<Protocol>,
    pub(crate) resolved: Option<Role>,
}

impl ConnectionState {
    pub(crate) fn new(conn_id: ConnectionId, addr: RemoteAddr, role: Role) -> Self {
        Self {
            conn_id,
            addr,
            protocol: Protocol::Unknown,
            role,
            ssl: false,
            wr_bytes: 0,
            rd_bytes: 0,
            last_reported_bytes: 0,
            stats_reported: false,
            protocol_match_count: 0,
            protocol_total_count: 0,
            carry: HeaderCarry::new(),
            disabled_up_to: None,
        }
    }

    /// Run inference over one payload and latch what it finds.
    ///
    /// The protocol is only ever set while it is still Unknown and the role
    /// only while it is still unresolved.
    pub(crate) fn classify(
        &mut self,
        engine: &InferenceEngine,
        direction: Direction,
        buf: &[u8],
    ) -> Classification {
        let mut outcome = Classification::default();
        self.protocol_total_count += 1;

        let inferred = engine.infer(buf, &mut self.carry, self.protocol);
        if !inferred.protocol.is_known() || self.protocol == Protocol::Mongo {
            return outcome;
        }

        if self.protocol == Protocol::Unknown {
            self.protocol = inferred.protocol;
            outcome.latched = Some(inferred.protocol);
        }
        if inferred.protocol == self.protocol {
            self.protocol_match_count += 1;
        }

        if !self.role.is_resolved() {
            let role = role_from_traffic(direction, inferred.message_type);
            if role.is_resolved() {
                self.role = role;
                outcome.resolved = Some(role);
            }
        }

        outcome
    }

    /// Stream offset where the next byte in `direction` lands.
    pub(crate) fn position(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Egress => self.wr_bytes,
            Direction::Ingress => self.rd_bytes,
        }
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.wr_bytes.saturating_add(self.rd_bytes)
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled_up_to
            .is_some_and(|up_to| self.conn_id.generation <= up_to)
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            conn_id:              self.conn_id,
            addr:                 self.addr,
            protocol:             self.protocol,
            role:                 self.role,
            ssl:                  self.ssl,
            wr_bytes:             self.wr_bytes,
            rd_bytes:             self.rd_bytes,
            last_reported_bytes:  self.last_reported_bytes,
            protocol_match_count: self.protocol_match_count,
            protocol_total_count: self.protocol_total_count,
            disabled_up_to:       self.disabled_up_to,
        }
    }
}

/// Read-only copy of a tracked connection's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub conn_id:              ConnectionId,
    pub addr:                 RemoteAddr,
    pub protocol:             Protocol,
    pub role:                 Role,
    pub ssl:                  bool,
    pub wr_bytes:             u64,
    pub rd_bytes:             u64,
    pub last_reported_bytes:  u64,
    pub protocol_match_count: u64,
    pub protocol_total_count: u64,
    pub disabled_up_to:       Option<u64>,
}
