//! Concurrent store of live connections
//!
//! `DashMap<ConnectionKey, Mutex<ConnectionState>>`: the shard lock is held
//! only to look up or insert an entry, while the per-key mutex serializes
//! updates to one connection. Locks are always taken shard first, mutex
//! second.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::CapacityPolicy;
use crate::state::ConnectionState;
use crate::types::{ConnectionId, ConnectionKey};

/// The registry is full and the capacity policy refused the new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CapacityExceeded;

/// Result of an access that may have created the entry.
#[derive(Debug)]
pub(crate) struct Admitted<R> {
    pub(crate) value:   R,
    pub(crate) created: bool,
    /// Connection dropped to make room for the new entry
    pub(crate) evicted: Option<ConnectionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Removed,
    /// The key is live but belongs to another generation
    Stale,
    Missing,
}

pub(crate) struct ConnectionRegistry {
    connections:     DashMap<ConnectionKey, Mutex<ConnectionState>>,
    /// Entries present or reserved, never above `max_connections`
    live:            AtomicUsize,
    max_connections: usize,
    policy:          CapacityPolicy,
    next_generation: AtomicU64,
}

fn lock(entry: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConnectionRegistry {
    pub(crate) fn new(max_connections: usize, policy: CapacityPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            live: AtomicUsize::new(0),
            max_connections,
            policy,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Fresh generation value, unique across all keys for the lifetime of
    /// the registry.
    pub(crate) fn new_conn_id(&self, key: ConnectionKey, start_time_ticks: u64) -> ConnectionId {
        ConnectionId {
            key,
            start_time_ticks,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// Run `f` on the entry for `key`, if there is one.
    pub(crate) fn with_existing<R>(
        &self,
        key: &ConnectionKey,
        f: impl FnOnce(&mut ConnectionState) -> R,
    ) -> Option<R> {
        let entry = self.connections.get(key)?;
        let mut state = lock(entry.value());
        Some(f(&mut state))
    }

    /// Run `f` on the entry for `key`, creating it with `init` first when
    /// absent. `f` learns whether the entry was just created.
    pub(crate) fn upsert<R>(
        &self,
        key: ConnectionKey,
        init: impl FnOnce() -> ConnectionState,
        f: impl FnOnce(&mut ConnectionState, bool) -> R,
    ) -> Result<Admitted<R>, CapacityExceeded> {
        if let Some(entry) = self.connections.get(&key) {
            let mut state = lock(entry.value());
            return Ok(Admitted {
                value:   f(&mut state, false),
                created: false,
                evicted: None,
            });
        }

        let evicted = self.reserve_slot()?;

        match self.connections.entry(key) {
            Entry::Occupied(occupied) => {
                // Lost a creation race; the slot we reserved is not needed.
                self.release_slot();
                let mut state = lock(occupied.get());
                Ok(Admitted {
                    value: f(&mut state, false),
                    created: false,
                    evicted,
                })
            },
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(Mutex::new(init()));
                let mut state = lock(entry.value());
                Ok(Admitted {
                    value: f(&mut state, true),
                    created: true,
                    evicted,
                })
            },
        }
    }

    /// Delete the entry for `key` whatever its generation.
    pub(crate) fn remove(&self, key: &ConnectionKey) -> Option<ConnectionState> {
        let (_, entry) = self.connections.remove(key)?;
        self.release_slot();
        Some(entry.into_inner().unwrap_or_else(|e| e.into_inner()))
    }

    /// Delete the entry for `conn_id.key` only if it is still the
    /// incarnation `conn_id` names.
    pub(crate) fn remove_generation(&self, conn_id: &ConnectionId) -> Removal {
        let removed = self.connections.remove_if(&conn_id.key, |_, entry| {
            lock(entry).conn_id.generation == conn_id.generation
        });
        if removed.is_some() {
            self.release_slot();
            Removal::Removed
        } else if self.connections.contains_key(&conn_id.key) {
            Removal::Stale
        } else {
            Removal::Missing
        }
    }

    fn reserve_slot(&self) -> Result<Option<ConnectionId>, CapacityExceeded> {
        if self.try_reserve() {
            return Ok(None);
        }
        match self.policy {
            CapacityPolicy::Reject => Err(CapacityExceeded),
            CapacityPolicy::EvictOldest => {
                let evicted = self.evict_oldest().ok_or(CapacityExceeded)?;
                if self.try_reserve() {
                    Ok(Some(evicted))
                } else {
                    Err(CapacityExceeded)
                }
            },
        }
    }

    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max_connections).then_some(live + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| live.checked_sub(1));
    }

    /// Remove the live connection with the lowest generation.
    fn evict_oldest(&self) -> Option<ConnectionId> {
        let oldest = self
            .connections
            .iter()
            .map(|entry| lock(entry.value()).conn_id)
            .min_by_key(|conn_id| conn_id.generation)?;

        match self.remove_generation(&oldest) {
            Removal::Removed => Some(oldest),
            Removal::Stale | Removal::Missing => None,
        }
    }
}
