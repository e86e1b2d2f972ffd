// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Lifecycle notifications broadcast to async observers. See [`LoopEvent`].

/// Why the loop shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ShutdownCause {
    /// `shutdown()` was called.
    Requested,
    /// The kernel selector failed non-transiently; the error also propagated out
    /// of `run()`.
    PollerFailed,
    /// The wake primitive broke; the loop can no longer be woken reliably.
    WakeChannelBroken,
}

/// Coarse lifecycle transitions, broadcast over a `tokio::sync::broadcast` channel.
///
/// Observers subscribe via `LoopHandle::subscribe()`; a slow observer may see
/// `Lagged` and miss intermediate events, which is fine for lifecycle signals -
/// the latest event is the one that matters. This is how an async application
/// awaits "the loop is drained" without polling: block on the receiver until
/// [`LoopEvent::Terminated`] arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// `run()` finished initializing; ticks are about to start.
    Started,
    /// The graceful drain completed; the loop thread is about to return.
    Terminated(ShutdownCause),
}
