//! Lock-free drop/truncation/filter counters
//!
//! Nothing on the observation path fails loudly. Every observation that is
//! ignored, every byte that is not forwarded and every filter decision is
//! counted here instead.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! tracker_counters {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Live counters, updated with relaxed atomics from any thread.
        #[derive(Debug, Default)]
        pub struct TrackerCounters {
            $($(#[$doc])* pub $name: AtomicU64,)+
        }

        /// Point-in-time copy of [`TrackerCounters`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct CounterSnapshot {
            $($(#[$doc])* pub $name: u64,)+
        }

        impl TrackerCounters {
            pub fn snapshot(&self) -> CounterSnapshot {
                CounterSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)+
                }
            }
        }
    };
}

tracker_counters! {
    /// Observations handed to the tracker
    observations,
    /// Observations for a process other than the target one
    unmatched_target,
    /// Observations on connections of a non-INET address family
    non_inet_skipped,
    /// Data observations whose TLS flag disagreed with the connection's
    ssl_mismatch,
    /// Data observations that moved no bytes
    empty_data,
    /// Close, disable or cleanup for a key that is not tracked
    lookup_miss,
    /// New connections refused because the registry was full
    capacity_rejected,
    /// Connections dropped to make room for a new one
    capacity_evicted,
    connections_created,
    connections_closed,
    /// Connections whose protocol was latched
    protocols_latched,
    /// Data observations held back by the data filter
    data_filtered,
    data_chunks,
    /// Bytes declared by data chunks but not carried in them
    truncated_bytes,
    /// Bytes past the segment bound of a scatter/gather observation, for
    /// which no chunk exists at all
    unreported_bytes,
    stats_events,
    cleanup_removed,
    /// Cleanup entries whose generation no longer matched
    cleanup_stale,
    /// Cleanup entries past the batch bound, left for a later sweep
    cleanup_deferred,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn add(counter: &AtomicU64, n: u64) {
    if n > 0 {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
