// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks

//! The microtask queue: a bounded ring for the common case plus an unbounded spill
//! list for bursts.
//!
//! Microtasks only ever originate on the loop thread (promise reactions, explicit
//! `schedule_microtask` calls from running callbacks), and only the loop thread pops
//! them, so this structure is single-threaded by construction - no atomics, no locks,
//! and `pop()` never blocks.
//!
//! # FIFO Across the Spill Boundary
//!
//! Once an entry lands in the spill list, *all* later pushes go to the spill even if
//! ring slots free up - otherwise a late push could overtake the spilled entries.
//! The ring drains first (its entries are strictly older), then the spill, and the
//! ring becomes eligible for new pushes again only once the spill is empty.

use crate::task::LocalTask;
use std::collections::VecDeque;

/// Default ring capacity. Power of two; overridable via loop options.
pub const DEFAULT_MICROTASK_RING_CAPACITY: usize = 1_024;

/// Bounded-ring-plus-spill FIFO of [`LocalTask`]s. Loop thread only.
pub struct MicrotaskQueue {
    ring: Vec<Option<LocalTask>>,
    mask: usize,
    /// Pop side of the ring.
    head: usize,
    /// Push side of the ring.
    tail: usize,
    ring_len: usize,
    spill: VecDeque<LocalTask>,
}

impl std::fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("ring_capacity", &self.ring.len())
            .field("ring_len", &self.ring_len)
            .field("spill_len", &self.spill.len())
            .finish()
    }
}

impl MicrotaskQueue {
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        debug_assert!(ring_capacity.is_power_of_two());
        let mut ring = Vec::with_capacity(ring_capacity);
        ring.resize_with(ring_capacity, || None);
        Self {
            ring,
            mask: ring_capacity - 1,
            head: 0,
            tail: 0,
            ring_len: 0,
            spill: VecDeque::new(),
        }
    }

    /// Appends a microtask, spilling when the ring is full (or already spilling).
    pub fn push(&mut self, task: LocalTask) {
        if self.spill.is_empty() && self.ring_len < self.ring.len() {
            self.ring[self.tail & self.mask] = Some(task);
            self.tail = self.tail.wrapping_add(1);
            self.ring_len += 1;
        } else {
            self.spill.push_back(task);
        }
    }

    /// Removes the oldest microtask. Never blocks; `None` means empty.
    pub fn pop(&mut self) -> Option<LocalTask> {
        if self.ring_len > 0 {
            let task = self.ring[self.head & self.mask].take();
            debug_assert!(task.is_some(), "occupied ring slot must hold a task");
            self.head = self.head.wrapping_add(1);
            self.ring_len -= 1;
            return task;
        }
        self.spill.pop_front()
    }

    /// Total queued: ring occupancy plus spill backlog.
    #[must_use]
    pub fn len(&self) -> usize { self.ring_len + self.spill.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.ring_len == 0 && self.spill.is_empty() }
}
