// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The producer-facing handle. See [`LoopHandle`].

use super::{LoopEvent, LoopShared, LoopState};
use crate::{core::TickTime,
            error::LoopError,
            promise::{PromiseHandle, PromiseRejecter, PromiseResolver},
            task::Task};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Cheap, cloneable, `Send + Sync` handle for interacting with a loop from any
/// thread.
///
/// Everything here goes through the shared state: submission through the ingress
/// queue (with the Write-Then-Check wake), promise creation through the
/// mutex-guarded registry, lifecycle observation through the broadcast channel.
/// None of it touches the loop-thread-only structures.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<LoopShared>) -> Self { Self { shared } }

    /// Submits a task to run on the loop thread. Ownership transfers here; the
    /// loop drops the callable right after it executes.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopNotRunning`] before `run()`;
    /// [`LoopError::LoopTerminated`] once shutdown began;
    /// [`LoopError::WakeChannelBroken`] when the task was enqueued but the
    /// sleeping loop could not be signaled.
    pub fn submit(&self, task: Task) -> Result<(), LoopError> {
        self.shared.submit(task)
    }

    /// Forces the loop through another tick, e.g. after changing state it watches.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopTerminated`] after shutdown,
    /// [`LoopError::WakeChannelBroken`] when the wake primitive is broken.
    pub fn wake(&self) -> Result<(), LoopError> {
        if self.shared.state.load() == LoopState::Terminated {
            return Err(LoopError::LoopTerminated);
        }
        self.shared.wake.notify()
    }

    /// Requests graceful shutdown: new submissions fail, everything already
    /// accepted (plus transitively queued microtasks) drains, still-pending
    /// promises reject, then the loop terminates. Idempotent; returns without
    /// waiting - subscribe to [`LoopEvent::Terminated`] to await completion.
    pub fn shutdown(&self) {
        if self.shared.state.request_terminate() {
            tracing::debug!("loop shutdown requested");
        }
        // Wake the loop so a sleeping loop notices promptly. Best effort: a broken
        // wake channel is already a fatal condition the loop handles itself.
        drop(self.shared.wake.notify());
    }

    /// Subscribes to lifecycle events ([`LoopEvent::Started`],
    /// [`LoopEvent::Terminated`]).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.shared.events_tx.subscribe()
    }

    /// The loop's published tick time. Lock-free.
    #[must_use]
    pub fn tick_time(&self) -> TickTime { self.shared.clock.tick_time() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState { self.shared.state.load() }

    /// Mints a promise with a thread-safe resolve/reject pair. The settlement is
    /// applied by the loop at its next microtask checkpoint; dropping both
    /// settlers unsettled rejects with
    /// [`TaskAborted`](crate::promise::TaskAborted).
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopTerminated`] or [`LoopError::PromiseIdExhausted`].
    pub fn new_promise(
        &self,
    ) -> Result<(PromiseHandle, PromiseResolver, PromiseRejecter), LoopError> {
        self.shared.mint_promise_with_settlers()
    }
}
