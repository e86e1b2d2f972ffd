// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Scheduling, cancellation, and expiry surface over the heap + slab. See
//! [`TimerRegistry`].

use super::{TimerHeap, TimerSlab, TimerWork};
use crate::{core::clock::TickTime, error::LoopError, task::LocalTask};
use std::{collections::HashMap, time::Duration};

/// Id→node maps, the expiry heap, and the node pool, glued together.
///
/// Loop-thread-only by design - no locks anywhere in here. Producers reach this
/// indirectly by submitting a task that schedules on their behalf.
///
/// One-shot timers and intervals occupy separate id spaces (both strictly
/// increasing, both non-reusing), matching the split operation surface
/// (`cancel_timer` vs `cancel_interval`).
#[derive(Debug, Default)]
pub struct TimerRegistry {
    slab: TimerSlab,
    heap: TimerHeap,
    by_timer: HashMap<u64, u32>,
    by_interval: HashMap<u64, u32>,
}

/// A timer checked out of the heap for firing. The callback has been moved out of
/// the node; the node itself stays in its slab slot until the tick code either
/// requeues it (intervals) or releases it (one-shots).
pub struct ExpiredTimer {
    pub(crate) slot: u32,
    pub id: u64,
    pub nesting_level: u32,
    pub is_interval: bool,
    pub work: TimerWork,
}

impl std::fmt::Debug for ExpiredTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiredTimer")
            .field("id", &self.id)
            .field("nesting_level", &self.nesting_level)
            .field("is_interval", &self.is_interval)
            .finish()
    }
}

impl TimerRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Inserts a one-shot timer. The id must come from the loop's timer id
    /// allocator (strictly increasing, never reused).
    pub fn schedule_timer(
        &mut self,
        id: u64,
        when: TickTime,
        nesting_level: u32,
        task: LocalTask,
    ) {
        let slot = self
            .slab
            .insert(id, when, nesting_level, TimerWork::Once(task));
        self.heap.push(&mut self.slab, slot);
        let previous = self.by_timer.insert(id, slot);
        debug_assert!(previous.is_none(), "timer ids are never reused");
    }

    /// Inserts a repeating timer.
    pub fn schedule_interval(
        &mut self,
        id: u64,
        when: TickTime,
        nesting_level: u32,
        every: Duration,
        callback: Box<dyn FnMut(&mut crate::event_loop::LoopCtx<'_>) + Send>,
    ) {
        let slot = self.slab.insert(
            id,
            when,
            nesting_level,
            TimerWork::Repeating { every, callback },
        );
        self.heap.push(&mut self.slab, slot);
        let previous = self.by_interval.insert(id, slot);
        debug_assert!(previous.is_none(), "interval ids are never reused");
    }

    /// Cancels a one-shot timer.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`] when the id is unknown - including ids that
    /// already fired or were already canceled. No silent reuse.
    pub fn cancel_timer(&mut self, id: u64) -> Result<(), LoopError> {
        let Some(slot) = self.by_timer.remove(&id) else {
            return Err(LoopError::TimerNotFound { id });
        };
        let heap_index = self.slab.get(slot).heap_index;
        debug_assert!(heap_index >= 0, "mapped one-shot timers are always heaped");
        #[allow(clippy::cast_sign_loss)]
        let removed = self.heap.remove_at(&mut self.slab, heap_index as usize);
        debug_assert_eq!(removed, slot);
        self.slab.release(slot);
        Ok(())
    }

    /// Cancels a batch, reporting per-id outcomes positionally.
    pub fn cancel_timers(&mut self, ids: &[u64]) -> Vec<Result<(), LoopError>> {
        ids.iter().map(|&id| self.cancel_timer(id)).collect()
    }

    /// Cancels an interval. Safe to call from inside the interval's own callback:
    /// the pending reschedule is suppressed and the node is released when the
    /// callback returns.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`] when the id is unknown.
    pub fn cancel_interval(&mut self, id: u64) -> Result<(), LoopError> {
        let Some(slot) = self.by_interval.remove(&id) else {
            return Err(LoopError::TimerNotFound { id });
        };
        let heap_index = self.slab.get(slot).heap_index;
        if heap_index >= 0 {
            #[allow(clippy::cast_sign_loss)]
            let removed = self.heap.remove_at(&mut self.slab, heap_index as usize);
            debug_assert_eq!(removed, slot);
            self.slab.release(slot);
        } else {
            // Currently firing. Mark it; requeue_interval() will release instead of
            // rescheduling.
            self.slab.get_mut(slot).canceled = true;
        }
        Ok(())
    }

    /// Deadline of the earliest scheduled timer.
    #[must_use]
    pub fn next_due(&self) -> Option<TickTime> { self.heap.next_due(&self.slab) }

    /// Checks out the earliest timer whose deadline is at or before `now`.
    ///
    /// One-shot entries leave their id map immediately, so a cancel issued from the
    /// fired callback itself reports [`LoopError::TimerNotFound`].
    pub fn pop_expired(&mut self, now: TickTime) -> Option<ExpiredTimer> {
        loop {
            let slot = self.heap.pop_due(&mut self.slab, now)?;
            let node = self.slab.get_mut(slot);
            if node.canceled {
                // Defensive: cancellation normally removes from the heap eagerly.
                let id = node.id;
                let is_interval = matches!(node.work, TimerWork::Repeating { .. });
                if is_interval {
                    self.by_interval.remove(&id);
                } else {
                    self.by_timer.remove(&id);
                }
                self.slab.release(slot);
                continue;
            }
            let id = node.id;
            let nesting_level = node.nesting_level;
            let work = std::mem::replace(&mut node.work, TimerWork::Taken);
            let is_interval = matches!(work, TimerWork::Repeating { .. });
            if !is_interval {
                self.by_timer.remove(&id);
            }
            return Some(ExpiredTimer {
                slot,
                id,
                nesting_level,
                is_interval,
                work,
            });
        }
    }

    /// Puts a fired interval back on the heap with its next deadline, unless it was
    /// canceled mid-callback (then the node is released). Returns whether it was
    /// requeued.
    pub fn requeue_interval(
        &mut self,
        expired: ExpiredTimer,
        next_when: TickTime,
        next_level: u32,
    ) -> bool {
        debug_assert!(expired.is_interval);
        let node = self.slab.get_mut(expired.slot);
        if node.canceled {
            self.slab.release(expired.slot);
            return false;
        }
        node.when = next_when;
        node.nesting_level = next_level;
        node.work = expired.work;
        self.heap.push(&mut self.slab, expired.slot);
        true
    }

    /// Releases a fired one-shot node back to the pool.
    pub fn release_fired(&mut self, expired: ExpiredTimer) {
        debug_assert!(!expired.is_interval);
        self.slab.release(expired.slot);
    }

    /// Cancels everything and pools every node. Shutdown path.
    pub fn cancel_all(&mut self) {
        for slot in self.heap.drain_all(&mut self.slab) {
            self.slab.release(slot);
        }
        self.by_timer.clear();
        self.by_interval.clear();
    }

    /// Count of scheduled (heaped) timers.
    #[must_use]
    pub fn scheduled_len(&self) -> usize { self.heap.len() }
}
