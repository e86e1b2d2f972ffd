// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The loop's atomic lifecycle state. See [`LoopState`] and [`AtomicLoopState`].

use std::sync::atomic::{AtomicI32, Ordering};

/// Lifecycle state, shared between the loop thread and producers.
///
/// ```text
///            try_sleep()          wake_up()
///   Awake ───────────────► Sleeping ─────────► Awake
///     │                        │
///     │   request_terminate()  │
///     └──────────┬─────────────┘
///                ▼
///           Terminating ───► Terminated        (absorbing)
/// ```
///
/// `Terminated` is absorbing: no transition leaves it. Producers read this state in
/// the Write-Then-Check protocol; every access is sequentially consistent because
/// the protocol's correctness argument relies on a single total order of the state
/// stores, the ingress operations, and the wake CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[repr(i32)]
pub enum LoopState {
    Awake = 0,
    Sleeping = 1,
    Terminating = 2,
    Terminated = 3,
}

impl LoopState {
    fn from_i32(raw: i32) -> LoopState {
        match raw {
            1 => LoopState::Sleeping,
            2 => LoopState::Terminating,
            3 => LoopState::Terminated,
            _ => LoopState::Awake,
        }
    }

    /// Terminating or Terminated.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Terminating | LoopState::Terminated)
    }
}

/// Atomic cell over [`LoopState`] with only the legal transitions exposed.
#[derive(Debug)]
pub struct AtomicLoopState {
    raw: AtomicI32,
}

impl Default for AtomicLoopState {
    fn default() -> Self { Self::new() }
}

impl AtomicLoopState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: AtomicI32::new(LoopState::Awake as i32),
        }
    }

    #[must_use]
    pub fn load(&self) -> LoopState {
        LoopState::from_i32(self.raw.load(Ordering::SeqCst))
    }

    /// Awake → Sleeping. Fails (returns false) when termination raced in - the
    /// loop must not block once a terminate request exists.
    #[must_use]
    pub fn try_sleep(&self) -> bool {
        self.raw
            .compare_exchange(
                LoopState::Awake as i32,
                LoopState::Sleeping as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Sleeping → Awake. A failure means termination was requested while asleep;
    /// the terminal state is left untouched.
    pub fn wake_up(&self) {
        drop(self.raw.compare_exchange(
            LoopState::Sleeping as i32,
            LoopState::Awake as i32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ));
    }

    /// {Awake, Sleeping} → Terminating. Returns whether this call was the one that
    /// initiated termination (idempotent callers ignore the return).
    pub fn request_terminate(&self) -> bool {
        loop {
            let current = self.raw.load(Ordering::SeqCst);
            if LoopState::from_i32(current).is_terminal() {
                return false;
            }
            if self
                .raw
                .compare_exchange(
                    current,
                    LoopState::Terminating as i32,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// * → Terminated. Loop thread only, at the end of the graceful drain.
    pub fn finalize(&self) {
        self.raw.store(LoopState::Terminated as i32, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sleep_wake_round_trip() {
        let state = AtomicLoopState::new();
        assert_eq!(state.load(), LoopState::Awake);
        assert!(state.try_sleep());
        assert_eq!(state.load(), LoopState::Sleeping);
        state.wake_up();
        assert_eq!(state.load(), LoopState::Awake);
    }

    #[test]
    fn test_terminate_beats_sleep() {
        let state = AtomicLoopState::new();
        assert!(state.request_terminate());
        assert!(!state.try_sleep(), "a terminating loop must not block");
        assert!(!state.request_terminate(), "second request is a no-op");
        state.finalize();
        assert_eq!(state.load(), LoopState::Terminated);
        assert!(!state.request_terminate());
        assert_eq!(state.load(), LoopState::Terminated);
    }

    #[test]
    fn test_wake_up_preserves_termination() {
        let state = AtomicLoopState::new();
        assert!(state.try_sleep());
        assert!(state.request_terminate());
        state.wake_up();
        assert_eq!(state.load(), LoopState::Terminating);
    }
}
