// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Loop construction, the blocking `run()` driver, and the graceful drain. See
//! [`EventLoop`].

use super::{EventLoopOptions, LoopCtx, LoopEvent, LoopHandle, LoopShared, LoopThreadState,
            ShutdownCause};
use crate::{error::LoopError,
            poller::IoPoller,
            promise::{LoopShuttingDown, PromiseValue, machine, promise_value},
            task::TaskKind};
use std::sync::{Arc, atomic::Ordering, mpsc::sync_channel};

/// A single-threaded cooperative event loop.
///
/// One instance owns (at most) one OS thread for its whole life: whichever thread
/// calls [`run()`] becomes the loop thread and stays inside until shutdown. All
/// user callbacks - tasks, microtasks, timers, promise reactions, FD callbacks -
/// execute there, serially. Producer threads interact exclusively through
/// [`LoopHandle`].
///
/// # Construction vs. Running
///
/// [`new()`] allocates every subsystem but creates no OS resources and spawns
/// nothing. [`run()`] creates the kernel selector and wake primitive, anchors the
/// monotonic clock, and starts ticking. This split lets an embedder build the loop
/// and hand out handles before deciding which thread to dedicate.
///
/// ```no_run
/// use r3bl_evloop::{EventLoop, EventLoopOptions};
///
/// let (event_loop, handle) = EventLoop::new(EventLoopOptions::default());
/// let loop_thread = std::thread::spawn(move || event_loop.run());
///
/// handle.submit(Box::new(|ctx| {
///     let _timer_id = ctx.schedule_timer(
///         std::time::Duration::from_millis(10),
///         Box::new(|ctx| ctx.shutdown()),
///     );
/// }))?;
///
/// loop_thread.join().unwrap()?;
/// # Ok::<(), r3bl_evloop::LoopError>(())
/// ```
///
/// [`new()`]: Self::new
/// [`run()`]: Self::run
pub struct EventLoop {
    pub(crate) shared: Arc<LoopShared>,
    pub(crate) thread: LoopThreadState,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("state", &self.shared.state.load())
            .finish()
    }
}

impl EventLoop {
    /// Allocates all subsystems. No OS resources, no threads.
    #[must_use]
    pub fn new(options: EventLoopOptions) -> (EventLoop, LoopHandle) {
        let options = options.normalized();
        let shared = LoopShared::new(&options);
        let handle = LoopHandle::new(Arc::clone(&shared));
        (
            EventLoop {
                shared,
                thread: LoopThreadState::new(options),
            },
            handle,
        )
    }

    /// Another producer handle.
    #[must_use]
    pub fn handle(&self) -> LoopHandle { LoopHandle::new(Arc::clone(&self.shared)) }

    /// Runs the loop on the calling thread until shutdown, consuming the loop.
    ///
    /// Returns `Ok(())` after a requested graceful shutdown, or the fatal error
    /// that forced termination. Either way, the graceful drain has completed by
    /// the time this returns: accepted work ran, pending promises rejected, timers
    /// pooled, FDs unregistered, poller and wake channel closed.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopAlreadyRunning`] on a second call,
    /// [`LoopError::LoopTerminated`] when shutdown already happened, or a fatal
    /// [`LoopError::Poller`] / [`LoopError::WakeChannelBroken`].
    pub fn run(mut self) -> Result<(), LoopError> {
        self.start()?;
        let outcome = self.drive();
        self.finish(outcome)
    }

    /// One-time initialization on the loop thread: OS resources, clock anchor,
    /// lifecycle broadcast.
    pub(crate) fn start(&mut self) -> Result<(), LoopError> {
        if self.shared.state.load().is_terminal() {
            return Err(LoopError::LoopTerminated);
        }
        if self.shared.run_started.swap(true, Ordering::SeqCst) {
            return Err(LoopError::LoopAlreadyRunning);
        }
        self.shared.set_loop_thread();
        self.shared.clock.anchor_now();
        drop(self.shared.clock.refresh());

        let poller = IoPoller::new(
            self.thread.options.poll_events_capacity,
            Arc::clone(&self.shared.fd_count),
        )?;
        let (wake_tx, wake_rx) = sync_channel::<()>(1);
        self.shared.wake.install(poller.waker(), wake_tx);
        self.thread.poller = Some(poller);
        self.thread.wake_rx = Some(wake_rx);

        self.shared.broadcast(LoopEvent::Started);
        tracing::debug!("event loop started");
        Ok(())
    }

    /// Ticks until a terminate request or a fatal error.
    fn drive(&mut self) -> Result<ShutdownCause, LoopError> {
        loop {
            if self.shared.state.load().is_terminal() {
                return Ok(ShutdownCause::Requested);
            }
            if self.shared.wake.is_broken() {
                drop(self.shared.state.request_terminate());
                return Err(LoopError::WakeChannelBroken);
            }
            self.tick_once()?;
        }
    }

    /// Graceful drain + terminal transition, regardless of how `drive` ended.
    fn finish(&mut self, outcome: Result<ShutdownCause, LoopError>) -> Result<(), LoopError> {
        drop(self.shared.state.request_terminate());
        self.graceful_drain();

        let cause = match &outcome {
            Ok(cause) => *cause,
            Err(LoopError::WakeChannelBroken) => ShutdownCause::WakeChannelBroken,
            Err(_) => ShutdownCause::PollerFailed,
        };
        self.shared.state.finalize();
        self.shared.broadcast(LoopEvent::Terminated(cause));
        tracing::debug!(%cause, "event loop terminated");
        outcome.map(|_cause| ())
    }

    /// Runs accepted work to completion, rejects pending promises, cancels
    /// timers, and closes OS resources.
    ///
    /// "Accepted" means everything that made it into the ingress queue before
    /// [`close()`] took the mutex - a producer that won that race gets its task
    /// executed, one that lost gets [`LoopError::LoopTerminated`] from `submit`.
    ///
    /// [`close()`]: crate::core::IngressQueue::close
    fn graceful_drain(&mut self) {
        self.shared.ingress.close();

        // Phase 1: run every accepted task plus all transitively queued
        // microtasks.
        loop {
            let mut ran_any = false;
            while let Some(task) = self.thread.internal_tasks.pop_front() {
                self.run_local_task(TaskKind::Task, task);
                ran_any = true;
            }
            while let Some(task) = self.shared.ingress.pop() {
                self.run_local_task(TaskKind::Task, task);
                ran_any = true;
            }
            self.microtask_checkpoint_unbounded();
            if !ran_any
                && self.thread.internal_tasks.is_empty()
                && self.thread.microtasks.is_empty()
                && !self.shared.has_external_work()
            {
                break;
            }
        }

        // Phase 2: reject everything still pending, then run the reactions that
        // produced. Reactions may mint new promises; repeat until quiescent.
        let reason: PromiseValue = promise_value(LoopShuttingDown);
        loop {
            let alive = self.shared.promises.take_all_alive();
            if alive.is_empty() {
                break;
            }
            tracing::debug!(count = alive.len(), "rejecting tracked promises at shutdown");
            for promise in &alive {
                let reason = Arc::clone(&reason);
                self.with_ctx(|ctx| machine::settle_direct(ctx, promise, Err(reason)));
            }
            self.microtask_checkpoint_unbounded();
        }

        // Phase 3: discard the time-driven work and close OS resources.
        self.thread.timers.cancel_all();
        self.thread.immediates.clear();
        if let Some(poller) = self.thread.poller.as_mut() {
            poller.close();
        }
        self.thread.wake_rx = None;
    }

    /// Builds a [`LoopCtx`] over this loop's state and runs `f` with it.
    pub(crate) fn with_ctx<R>(&mut self, f: impl FnOnce(&mut LoopCtx<'_>) -> R) -> R {
        let mut ctx = LoopCtx {
            shared: &self.shared,
            thread: &mut self.thread,
        };
        f(&mut ctx)
    }
}
