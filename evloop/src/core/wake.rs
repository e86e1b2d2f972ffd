// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words eventfd EAGAIN EPIPE syscall syscalls

//! The wake-up channel and the producer half of the lost-wake-up-free protocol.
//!
//! # The Problem
//!
//! The loop blocks in the kernel (epoll/kqueue via [`mio::Poll::poll()`], or a
//! channel receive in fast-path mode) whenever it has nothing to do. Producer threads
//! enqueue work from the outside. Without care, this interleaving strands a task until
//! some unrelated event wakes the loop:
//!
//! ```text
//! Loop:     len == 0 ──────────────────────► block in poll()   (sleeps forever)
//! Producer:          ──► enqueue ──► "loop looks awake, skip wake"
//! ```
//!
//! # The Protocol
//!
//! Two symmetric rules close the window. Both sides use sequentially consistent
//! atomics; the ingress mutex doubles as the StoreLoad barrier on the loop side.
//!
//! **Loop (Check-Then-Sleep):**
//! 1. Store `LoopState::Sleeping`.
//! 2. Acquire the ingress lock, read the queue length, release the lock.
//! 3. Length > 0? Store `Awake` and skip the block entirely.
//! 4. Otherwise block (poll or channel receive).
//!
//! **Producer (Write-Then-Check):**
//! 1. Enqueue the task (under the same ingress lock).
//! 2. Load the loop state.
//! 3. If `Sleeping`, call [`WakeSignal::notify()`] - a CAS-guarded single syscall.
//!
//! If the loop observed length 0 and slept, then in the SeqCst total order every
//! producer's enqueue comes after the loop's length read, which comes after the
//! `Sleeping` store - so that producer's state load observes `Sleeping` and sends a
//! wake. No interleaving strands a task.
//!
//! # Wake-Up Deduplication
//!
//! A burst of M producers must not issue M wake syscalls. [`WakeSignal`] guards the
//! syscall with a `CAS(pending: 0 → 1)`; losers of the race elide the syscall. The
//! loop resets `pending` to 0 in its drain routine, after consuming the signal and
//! before it can sleep again, so the number of syscalls is bounded by the number of
//! drain cycles, never by M.
//!
//! # Two Wake Backends
//!
//! | Mode                        | Blocked in                      | Woken by                         |
//! | :-------------------------- | :------------------------------ | :------------------------------- |
//! | [`SleepMode::Poller`]       | `mio::Poll::poll()`             | [`mio::Waker`] (eventfd / pipe / posted completion) |
//! | [`SleepMode::Channel`]      | `sync_channel(1)` receive       | `try_send(())` - a full buffer *is* the dedup |
//!
//! The fast-path channel is used when no user FDs are registered; it skips the
//! kernel's readiness machinery entirely and has measurably lower ping-pong latency.
//! The loop publishes its current mode before storing `Sleeping`, so a producer that
//! observes `Sleeping` also observes the matching mode. A producer that loses the
//! mode race falls back to the poller waker - a spurious eventfd write is harmless
//! (the next poll drains it), whereas a missed one is not.

use crate::error::LoopError;
use std::sync::{Arc, OnceLock,
                atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering},
                mpsc::{SyncSender, TrySendError}};

/// Where the loop is (or will next be) blocked. Published by the loop thread before it
/// stores `Sleeping`, read by producers after they observe `Sleeping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[repr(u8)]
pub enum SleepMode {
    /// The loop is awake; no block is in progress.
    Awake = 0,
    /// Blocked in [`mio::Poll::poll()`].
    Poller = 1,
    /// Blocked on the single-slot fast-path channel.
    Channel = 2,
}

impl SleepMode {
    fn from_u8(raw: u8) -> SleepMode {
        match raw {
            1 => SleepMode::Poller,
            2 => SleepMode::Channel,
            _ => SleepMode::Awake,
        }
    }
}

/// One-shot, deduplicated wake signal from producer threads to the (possibly
/// kernel-blocked) loop thread.
///
/// The backends are installed once at `run()` start - [`mio::Waker`] is bound to the
/// poller's registry, and the channel sender is paired with a receiver the loop owns.
/// Before installation every [`notify()`] is a no-op, which is correct: the loop is
/// not running, so there is nothing to wake.
///
/// [`notify()`]: Self::notify
#[derive(Debug, Default)]
pub struct WakeSignal {
    /// The dedup flag: 0 = no wake in flight, 1 = a wake has been sent and not yet
    /// consumed. Reset by [`Self::rearm()`] in the loop's drain routine.
    pending: AtomicU32,

    /// Current [`SleepMode`] as its `repr(u8)` value.
    sleep_mode: AtomicU8,

    /// Wake primitive bound to the poller (eventfd on Linux, pipe on the BSDs, posted
    /// completion on Windows). `mio` owns the drain discipline for the underlying fd.
    poller_waker: OnceLock<Arc<mio::Waker>>,

    /// Fast-path sender. Capacity 1; a full buffer means a wake is already queued.
    channel_tx: OnceLock<SyncSender<()>>,

    /// Set when the wake primitive failed non-transiently. Fatal for the loop.
    broken: AtomicBool,
}

impl WakeSignal {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Installs both wake backends. Called once from `run()` after the poller exists.
    pub fn install(&self, poller_waker: Arc<mio::Waker>, channel_tx: SyncSender<()>) {
        drop(self.poller_waker.set(poller_waker));
        drop(self.channel_tx.set(channel_tx));
    }

    /// Publishes the mode of the *next* block. Loop thread only; must happen before
    /// the `Sleeping` state store.
    pub fn set_sleep_mode(&self, mode: SleepMode) {
        self.sleep_mode.store(mode as u8, Ordering::SeqCst);
    }

    /// Sends a wake if one is not already in flight.
    ///
    /// Callable from any thread. The CAS makes the syscall at-most-once per drain
    /// cycle; the loser returns `Ok` immediately.
    ///
    /// # Errors
    ///
    /// [`LoopError::WakeChannelBroken`] when the underlying primitive has failed
    /// non-transiently (half-open pipe, closed channel). The loop treats this as
    /// fatal.
    pub fn notify(&self) -> Result<(), LoopError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(LoopError::WakeChannelBroken);
        }
        if self
            .pending
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Another producer already woke the loop. Elide the syscall.
            return Ok(());
        }

        match SleepMode::from_u8(self.sleep_mode.load(Ordering::SeqCst)) {
            SleepMode::Channel => self.notify_channel(),
            SleepMode::Poller | SleepMode::Awake => self.notify_poller(),
        }
    }

    fn notify_channel(&self) -> Result<(), LoopError> {
        let Some(tx) = self.channel_tx.get() else {
            return Ok(());
        };
        match tx.try_send(()) {
            // A full buffer means a wake is already queued. Same outcome.
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => {
                self.broken.store(true, Ordering::SeqCst);
                Err(LoopError::WakeChannelBroken)
            }
        }
    }

    fn notify_poller(&self) -> Result<(), LoopError> {
        let Some(waker) = self.poller_waker.get() else {
            return Ok(());
        };
        match waker.wake() {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::error!(%error, "wake primitive failed; marking wake channel broken");
                self.broken.store(true, Ordering::SeqCst);
                Err(LoopError::WakeChannelBroken)
            }
        }
    }

    /// Resets the dedup flag. Loop thread only, called in the drain routine after the
    /// wake signal has actually been consumed - resetting earlier would re-arm
    /// producers before the loop finished waking.
    pub fn rearm(&self) { self.pending.store(0, Ordering::SeqCst); }

    /// Whether the wake primitive has failed non-transiently.
    #[must_use]
    pub fn is_broken(&self) -> bool { self.broken.load(Ordering::SeqCst) }

    /// Test/diagnostic view of the dedup flag.
    #[must_use]
    pub fn is_pending(&self) -> bool { self.pending.load(Ordering::SeqCst) == 1 }

    /// Installs only the channel backend, for protocol tests that have no poller.
    #[cfg(test)]
    pub(crate) fn install_channel_only_for_test(&self, channel_tx: SyncSender<()>) {
        drop(self.channel_tx.set(channel_tx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_notify_before_install_is_a_no_op() {
        let signal = WakeSignal::new();
        assert!(signal.notify().is_ok());
        assert!(signal.is_pending());
    }

    #[test]
    fn test_channel_wake_is_deduplicated() {
        let signal = WakeSignal::new();
        let (tx, rx) = sync_channel::<()>(1);
        drop(signal.channel_tx.set(tx));
        signal.set_sleep_mode(SleepMode::Channel);

        // First notify performs the send; the rest elide via the CAS.
        for _ in 0..100 {
            signal.notify().unwrap();
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "exactly one wake token expected");

        // After rearm a fresh notify goes through again.
        signal.rearm();
        signal.notify().unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_full_channel_buffer_counts_as_woken() {
        let signal = WakeSignal::new();
        let (tx, _rx_keep_alive) = sync_channel::<()>(1);
        tx.send(()).unwrap(); // Pre-fill the single slot.
        drop(signal.channel_tx.set(tx));
        signal.set_sleep_mode(SleepMode::Channel);
        assert!(signal.notify().is_ok());
    }

    #[test]
    fn test_disconnected_channel_is_fatal() {
        let signal = WakeSignal::new();
        let (tx, rx) = sync_channel::<()>(1);
        drop(rx);
        drop(signal.channel_tx.set(tx));
        signal.set_sleep_mode(SleepMode::Channel);

        assert!(matches!(
            signal.notify(),
            Err(LoopError::WakeChannelBroken)
        ));
        assert!(signal.is_broken());
        // Subsequent notifies fail fast without touching the channel.
        assert!(matches!(
            signal.notify(),
            Err(LoopError::WakeChannelBroken)
        ));
    }

    #[test]
    fn test_wake_syscalls_bounded_by_drain_cycles_not_producers() {
        let signal = Arc::new(WakeSignal::new());
        let (tx, rx) = sync_channel::<()>(1);
        drop(signal.channel_tx.set(tx));
        signal.set_sleep_mode(SleepMode::Channel);

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let signal = Arc::clone(&signal);
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        signal.notify().unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // 8 000 notifies, at most one queued token (no rearm ran).
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
