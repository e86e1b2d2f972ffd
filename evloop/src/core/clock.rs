// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words monotonic

//! Monotonic clock with a per-tick anchor. See [`TickClock`] and [`TickTime`].

use std::{sync::{OnceLock,
                 atomic::{AtomicI64, Ordering}},
          time::{Duration, Instant}};

/// A point on the loop's monotonic timeline, in nanoseconds since the tick anchor.
///
/// The anchor is captured exactly once when the loop starts running (see
/// [`TickClock::anchor_now()`]), so `TickTime(0)` is "the instant `run()` began". All
/// timer expiries are expressed in this coordinate system, which keeps comparisons to
/// plain `i64` math with no syscall and no heap allocation.
///
/// Ties between equal instants are broken elsewhere (by timer id) - this type is a plain
/// ordered scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TickTime(pub i64);

impl TickTime {
    /// Returns this instant advanced by `delay`. Saturates instead of wrapping.
    #[must_use]
    pub fn after(self, delay: Duration) -> TickTime {
        let delay_ns = i64::try_from(delay.as_nanos()).unwrap_or(i64::MAX);
        TickTime(self.0.saturating_add(delay_ns))
    }

    /// Nanoseconds from `self` until `later`, clamped at zero when `later` is in the
    /// past.
    #[must_use]
    pub fn until(self, later: TickTime) -> Duration {
        let delta = later.0.saturating_sub(self.0);
        if delta <= 0 {
            Duration::ZERO
        } else {
            #[allow(clippy::cast_sign_loss)]
            Duration::from_nanos(delta as u64)
        }
    }
}

/// The loop's view of "now": an anchor [`Instant`] plus an atomic elapsed-nanoseconds
/// counter refreshed once per tick.
///
/// # Why Not Call `Instant::now()` Everywhere?
///
/// Timer scheduling, expiry checks, and poll-timeout computation all need "now" many
/// times per tick. Sampling the OS clock once per tick and publishing the result through
/// an atomic gives every consumer (including producer threads computing a timer's
/// expiry) the same consistent view for the duration of the drain, at the cost of a
/// single syscall per tick.
///
/// # Invariants
///
/// - The elapsed counter is written only by the loop thread, via [`refresh()`].
/// - Reads are lock-free and may happen on any thread.
/// - The published value is monotonically non-decreasing: [`refresh()`] uses
///   [`fetch_max`] so a spurious backwards [`Instant`] reading can never rewind it.
///
/// [`fetch_max`]: AtomicI64::fetch_max
/// [`refresh()`]: Self::refresh
#[derive(Debug, Default)]
pub struct TickClock {
    /// Set exactly once, at `run()` start. Empty before the loop runs.
    anchor: OnceLock<Instant>,

    /// Nanoseconds since [`Self::anchor`], published by the loop thread each tick.
    elapsed_ns: AtomicI64,
}

impl TickClock {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Captures the anchor. Idempotent - only the first call has an effect.
    pub fn anchor_now(&self) { drop(self.anchor.set(Instant::now())); }

    /// Re-samples the OS clock and publishes the new elapsed value. Loop thread only.
    ///
    /// Returns the refreshed [`TickTime`].
    pub fn refresh(&self) -> TickTime {
        let Some(anchor) = self.anchor.get() else {
            return TickTime(0);
        };
        let sampled = i64::try_from(anchor.elapsed().as_nanos()).unwrap_or(i64::MAX);
        let prev = self.elapsed_ns.fetch_max(sampled, Ordering::SeqCst);
        TickTime(prev.max(sampled))
    }

    /// The tick-consistent "now". Lock-free, callable from any thread.
    #[must_use]
    pub fn tick_time(&self) -> TickTime {
        TickTime(self.elapsed_ns.load(Ordering::SeqCst))
    }
}
