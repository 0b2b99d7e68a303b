//! Byte accounting and stats reports

use crate::event::{CONN_CLOSE, CONN_OPEN, StatsEvent};
use crate::state::ConnectionState;
use crate::types::{Direction, TimestampNs};

/// Turns per-connection byte counts into threshold-driven stats reports.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatsAggregator {
    threshold: u64,
}

impl StatsAggregator {
    pub(crate) fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Account `bytes` moved in `direction`, reporting once the combined
    /// total has grown by a full threshold since the previous report.
    pub(crate) fn record(
        &self,
        state: &mut ConnectionState,
        direction: Direction,
        bytes: u64,
        timestamp: TimestampNs,
    ) -> Option<StatsEvent> {
        match direction {
            Direction::Egress => state.wr_bytes = state.wr_bytes.saturating_add(bytes),
            Direction::Ingress => state.rd_bytes = state.rd_bytes.saturating_add(bytes),
        }

        let total = state.total_bytes();
        if total < state.last_reported_bytes.saturating_add(self.threshold) {
            return None;
        }

        state.last_reported_bytes = total;
        Some(report(state, timestamp, 0))
    }

    /// The final report for a closing connection, whatever the threshold
    /// state.
    pub(crate) fn report_close(
        &self,
        state: &mut ConnectionState,
        timestamp: TimestampNs,
    ) -> StatsEvent {
        report(state, timestamp, CONN_CLOSE)
    }
}

fn report(state: &mut ConnectionState, timestamp: TimestampNs, mut conn_events: u32) -> StatsEvent {
    if !state.stats_reported {
        conn_events |= CONN_OPEN;
        state.stats_reported = true;
    }
    StatsEvent {
        timestamp,
        conn_id: state.conn_id,
        addr: state.addr,
        role: state.role,
        wr_bytes: state.wr_bytes,
        rd_bytes: state.rd_bytes,
        conn_events,
    }
}
