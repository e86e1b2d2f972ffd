// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words scavenger scavenged

//! The id-keyed weak-reference table and its round-robin scavenger. See
//! [`PromiseRegistry`].
//!
//! # Why a Scavenger?
//!
//! Scripts create promises at high rates and drop most of them after settlement.
//! The registry maps ids to promises so a facade can refer to them by number, but a
//! map of strong references would pin every promise forever. Instead the map holds
//! [`Weak`] references plus a ring of ids that a rate-limited cursor sweeps; entries
//! whose promise died (weak upgrade fails) or already settled are removed a batch
//! per visit, amortizing cleanup across ticks instead of stalling any single one.
//!
//! # Compaction
//!
//! Removal alone leaves ghosts: the ring keeps null-marker slots and the hash map
//! keeps its grown bucket array. After each complete sweep (cursor wrap), when the
//! live population is below a quarter of the ring and the ring is big enough to
//! matter, both structures are rebuilt from the live set - breaking old bucket
//! chains is the point, so the map is a fresh allocation, not a `retain()`.

use super::machine::{Promise, PromiseHandle};
use std::{collections::HashMap,
          sync::{Arc, Mutex, Weak}};

/// Ring slots holding this are scavenged leftovers awaiting compaction.
const NULL_ID: u64 = 0;

/// Compaction only considers rings larger than this.
const COMPACT_MIN_CAPACITY: usize = 256;

/// What one [`PromiseRegistry::scavenge()`] call did, for telemetry and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScavengeOutcome {
    pub scanned: usize,
    pub removed: usize,
    pub wrapped: bool,
    pub compacted: bool,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<u64, Weak<Promise>>,
    ring: Vec<u64>,
    cursor: usize,
}

/// Id → weak-promise table plus the scavenging ring.
///
/// `new_promise` is callable from any thread (producers promisify work before
/// handing it to the loop), hence the mutex. The scavenger runs only on the loop
/// thread, one bounded batch per tick.
///
/// The registry never holds a strong reference past the duration of a single
/// settled-check - anything else would leak every abandoned promise.
#[derive(Debug, Default)]
pub struct PromiseRegistry {
    inner: Mutex<RegistryInner>,
}

impl PromiseRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Creates and tracks a promise under a caller-allocated id (ids start at 1 and
    /// increase strictly; [`NULL_ID`] is reserved for scavenged slots).
    pub fn register(&self, id: u64) -> PromiseHandle {
        debug_assert_ne!(id, NULL_ID);
        let promise = Promise::new(id);
        let mut inner = self.inner.lock().unwrap();
        inner.by_id.insert(id, Arc::downgrade(&promise));
        inner.ring.push(id);
        PromiseHandle { promise }
    }

    /// Looks an id up, returning a strong handle when the promise is still alive.
    #[must_use]
    pub fn lookup(&self, id: u64) -> Option<PromiseHandle> {
        let inner = self.inner.lock().unwrap();
        let promise = inner.by_id.get(&id)?.upgrade()?;
        Some(PromiseHandle { promise })
    }

    /// Sweeps up to `batch` ring slots from the cursor, removing dead and settled
    /// entries. Wrapping the cursor completes a sweep and may trigger compaction.
    pub fn scavenge(&self, batch: usize) -> ScavengeOutcome {
        let mut outcome = ScavengeOutcome::default();
        let mut inner = self.inner.lock().unwrap();
        let steps = batch.min(inner.ring.len());

        for _ in 0..steps {
            if inner.cursor >= inner.ring.len() {
                inner.cursor = 0;
                outcome.wrapped = true;
            }
            let cursor = inner.cursor;
            let id = inner.ring[cursor];
            inner.cursor += 1;
            outcome.scanned += 1;
            if id == NULL_ID {
                continue;
            }

            let remove = match inner.by_id.get(&id) {
                // The map entry vanished out-of-band (reject_all); null the slot so
                // the cursor never revisits it.
                None => true,
                Some(weak) => match weak.upgrade() {
                    None => true,
                    Some(promise) => promise.is_settled(),
                },
            };
            if remove {
                inner.by_id.remove(&id);
                inner.ring[cursor] = NULL_ID;
                outcome.removed += 1;
            }
        }

        if inner.cursor >= inner.ring.len() && !inner.ring.is_empty() {
            inner.cursor = 0;
            outcome.wrapped = true;
        }
        if outcome.wrapped {
            outcome.compacted = Self::maybe_compact(&mut inner);
        }
        outcome
    }

    /// Rebuilds ring and map from the live set when occupancy dropped below 25%.
    fn maybe_compact(inner: &mut RegistryInner) -> bool {
        if inner.ring.len() <= COMPACT_MIN_CAPACITY
            || inner.by_id.len() * 4 >= inner.ring.len()
        {
            return false;
        }
        let live = inner.by_id.len();
        let mut fresh_map = HashMap::with_capacity(live);
        let mut fresh_ring = Vec::with_capacity(live);
        for (&id, weak) in &inner.by_id {
            fresh_map.insert(id, weak.clone());
            fresh_ring.push(id);
        }
        inner.by_id = fresh_map;
        inner.ring = fresh_ring;
        inner.cursor = 0;
        true
    }

    /// Empties the registry, returning strong handles to every promise still alive.
    ///
    /// Shutdown path: the caller rejects the still-pending ones. Calling this twice
    /// is harmless - the second call sees an empty registry.
    #[must_use]
    pub fn take_all_alive(&self) -> Vec<Arc<Promise>> {
        let mut inner = self.inner.lock().unwrap();
        let alive: Vec<Arc<Promise>> = inner
            .by_id
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        inner.by_id = HashMap::new();
        inner.ring = Vec::new();
        inner.cursor = 0;
        alive
    }

    /// Tracked (not-yet-scavenged) entry count.
    #[must_use]
    pub fn live_len(&self) -> usize { self.inner.lock().unwrap().by_id.len() }

    /// Current ring length, including null slots. Bounded-footprint tests read
    /// this.
    #[must_use]
    pub fn ring_len(&self) -> usize { self.inner.lock().unwrap().ring.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::PromiseStateKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_register_and_lookup() {
        let registry = PromiseRegistry::new();
        let handle = registry.register(1);
        assert_eq!(handle.id(), 1);
        assert_eq!(handle.state(), PromiseStateKind::Pending);
        assert!(registry.lookup(1).is_some());
        assert!(registry.lookup(2).is_none());
    }

    #[test]
    fn test_registry_does_not_keep_promises_alive() {
        let registry = PromiseRegistry::new();
        let handle = registry.register(1);
        drop(handle);
        assert!(registry.lookup(1).is_none(), "weak entry must not resurrect");
    }

    #[test]
    fn test_scavenge_removes_dead_and_settled() {
        let registry = PromiseRegistry::new();
        let dropped = registry.register(1);
        let kept = registry.register(2);
        drop(dropped);

        let outcome = registry.scavenge(16);
        assert_eq!(outcome.removed, 1);
        assert_eq!(registry.live_len(), 1);

        // A second sweep with nothing new removes nothing.
        let outcome = registry.scavenge(16);
        assert_eq!(outcome.removed, 0);
        drop(kept);
    }

    #[test]
    fn test_scavenge_is_rate_limited_by_batch() {
        let registry = PromiseRegistry::new();
        let handles: Vec<_> = (1..=100).map(|id| registry.register(id)).collect();
        drop(handles);

        let outcome = registry.scavenge(10);
        assert_eq!(outcome.scanned, 10);
        assert_eq!(outcome.removed, 10);
        assert_eq!(registry.live_len(), 90);
    }

    #[test]
    fn test_compaction_after_wrap_bounds_footprint() {
        let registry = PromiseRegistry::new();
        let keep_count = 10;
        let total = 2_000;
        let mut kept = Vec::new();
        for id in 1..=total {
            let handle = registry.register(id);
            if id <= keep_count {
                kept.push(handle);
            }
        }

        // Sweep until the cursor wraps; everything but `kept` is dead.
        let mut wrapped = false;
        let mut compacted = false;
        for _ in 0..1_000 {
            let outcome = registry.scavenge(64);
            wrapped |= outcome.wrapped;
            compacted |= outcome.compacted;
            if wrapped {
                break;
            }
        }
        assert!(wrapped, "sweep must complete");
        assert!(compacted, "a 0.5% live ratio must trigger compaction");
        assert_eq!(registry.live_len(), usize::try_from(keep_count).unwrap());
        assert_eq!(
            registry.ring_len(),
            usize::try_from(keep_count).unwrap(),
            "compaction rebuilds the ring to the live set"
        );
        drop(kept);
    }

    #[test]
    fn test_take_all_alive_is_idempotent() {
        let registry = PromiseRegistry::new();
        let _keep = registry.register(1);
        let _keep2 = registry.register(2);
        assert_eq!(registry.take_all_alive().len(), 2);
        assert_eq!(registry.take_all_alive().len(), 0);
        assert_eq!(registry.live_len(), 0);
        assert_eq!(registry.ring_len(), 0);
    }
}
