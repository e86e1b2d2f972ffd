// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks

//! Loop configuration. See [`EventLoopOptions`].

use crate::core::{DEFAULT_CHUNK_CAPACITY, DEFAULT_MICROTASK_RING_CAPACITY,
                  MAX_CHUNK_CAPACITY, MIN_CHUNK_CAPACITY};

/// Tuning knobs for one loop instance. All fields have sensible defaults; most
/// embedders never touch anything but [`strict_microtask_ordering`].
///
/// [`strict_microtask_ordering`]: Self::strict_microtask_ordering
#[derive(Debug, Clone, Copy)]
pub struct EventLoopOptions {
    /// Slots per ingress chunk. Normalized to a power of two in `[16, 4096]`.
    pub ingress_chunk_capacity: usize,

    /// Per-tick cap on external tasks drained from the ingress queue. `None` means
    /// drain fully. Excess work leaves the loop awake for the next iteration
    /// instead of being lost.
    pub ingress_tick_budget: Option<usize>,

    /// Microtask ring size. Normalized to a power of two. Bursts beyond this spill
    /// to an unbounded overflow list - nothing is dropped, the ring is purely a
    /// fast path.
    pub microtask_ring_capacity: usize,

    /// Per-checkpoint cap on executed microtasks. When a checkpoint exhausts this
    /// budget with work remaining, the next poll is forced non-blocking so the
    /// backlog continues immediately on the following tick.
    pub microtask_checkpoint_budget: usize,

    /// Run a microtask checkpoint after *every* discrete task and timer callback,
    /// as the HTML event-loop processing model specifies. Off by default: the
    /// relaxed mode coalesces checkpoints at phase boundaries for throughput,
    /// which no microtask can observe unless it races timers within one tick.
    pub strict_microtask_ordering: bool,

    /// Sleep on a single-slot channel instead of the kernel poller while no user
    /// FDs are registered. Lower ping-pong latency for pure task/timer workloads.
    pub fast_path_wake: bool,

    /// Capacity of the kernel events buffer handed to the poller.
    pub poll_events_capacity: usize,

    /// Promise-registry ring slots swept per tick.
    pub scavenge_batch: usize,

    /// Capacity of the lifecycle broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for EventLoopOptions {
    fn default() -> Self {
        Self {
            ingress_chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            ingress_tick_budget: None,
            microtask_ring_capacity: DEFAULT_MICROTASK_RING_CAPACITY,
            microtask_checkpoint_budget: 1_024,
            strict_microtask_ordering: false,
            fast_path_wake: true,
            poll_events_capacity: 256,
            scavenge_batch: 64,
            event_channel_capacity: 64,
        }
    }
}

impl EventLoopOptions {
    /// Clamps every field into its valid range. Called once at loop construction;
    /// out-of-range values are corrected silently rather than rejected.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.ingress_chunk_capacity = self
            .ingress_chunk_capacity
            .next_power_of_two()
            .clamp(MIN_CHUNK_CAPACITY, MAX_CHUNK_CAPACITY);
        self.microtask_ring_capacity =
            self.microtask_ring_capacity.next_power_of_two().max(16);
        self.microtask_checkpoint_budget = self.microtask_checkpoint_budget.max(1);
        self.poll_events_capacity = self.poll_events_capacity.max(16);
        self.scavenge_batch = self.scavenge_batch.max(1);
        self.event_channel_capacity = self.event_channel_capacity.max(1);
        self
    }
}
