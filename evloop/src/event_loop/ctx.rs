// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks

//! The loop-thread operation surface handed to every callback. See [`LoopCtx`].

use super::{EventLoopOptions, LoopHandle, LoopShared};
use crate::{core::{ImmediateQueue, MicrotaskQueue, TickTime, TimerRegistry, clamp_delay},
            error::LoopError,
            poller::IoPoller,
            promise::{self, PromiseHandle, PromiseRejecter, PromiseResolver,
                      PromiseValue},
            task::LocalTask};
use std::{collections::VecDeque,
          sync::{Arc, mpsc::Receiver},
          time::Duration};

#[cfg(unix)]
use crate::poller::{FdCallback, FdInterest};
#[cfg(unix)]
use std::os::fd::RawFd;

/// All loop-thread-only mutable state: the structures nothing but the loop thread
/// may touch, so they carry no locks at all.
pub(crate) struct LoopThreadState {
    pub options: EventLoopOptions,
    pub microtasks: MicrotaskQueue,
    pub timers: TimerRegistry,
    pub immediates: ImmediateQueue,
    pub internal_tasks: VecDeque<LocalTask>,
    pub poller: Option<IoPoller>,
    pub wake_rx: Option<Receiver<()>>,
    pub ready_buffer: Vec<crate::poller::ReadyFd>,
    /// The HTML5 timer nesting depth. 0 outside timer callbacks; the timer-fire
    /// scope sets and unconditionally restores it.
    pub nesting_depth: u32,
    /// Set when a microtask checkpoint exhausted its budget; forces the next poll
    /// non-blocking so the backlog resumes immediately.
    pub force_non_blocking_poll: bool,
}

impl LoopThreadState {
    pub(crate) fn new(options: EventLoopOptions) -> Self {
        Self {
            microtasks: MicrotaskQueue::new(options.microtask_ring_capacity),
            timers: TimerRegistry::new(),
            immediates: ImmediateQueue::new(),
            internal_tasks: VecDeque::new(),
            poller: None,
            wake_rx: None,
            ready_buffer: Vec::new(),
            nesting_depth: 0,
            force_non_blocking_poll: false,
            options,
        }
    }
}

/// The operation surface available while running *on* the loop thread.
///
/// Every task, microtask, timer callback, FD callback, and promise reaction
/// receives `&mut LoopCtx`. Holding it proves you are the loop thread, which is
/// what lets these operations touch the lock-free loop-local structures (timer
/// heap, microtask ring) directly, and gives promise operations the exact
/// enqueue-at-settlement-time ordering ECMA-262 specifies.
///
/// Producer threads use [`LoopHandle`] instead; its operations funnel through the
/// ingress queue or the settlement inbox.
pub struct LoopCtx<'a> {
    pub(crate) shared: &'a Arc<LoopShared>,
    pub(crate) thread: &'a mut LoopThreadState,
}

impl std::fmt::Debug for LoopCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoopCtx")
    }
}

impl LoopCtx<'_> {
    /// The tick-consistent "now": refreshed once per tick, stable across a drain.
    #[must_use]
    pub fn tick_time(&self) -> TickTime { self.shared.clock.tick_time() }

    /// A cloneable, `Send` handle for producer threads.
    #[must_use]
    pub fn handle(&self) -> LoopHandle { LoopHandle::new(Arc::clone(self.shared)) }

    /// Current timer nesting depth (0 outside timer callbacks).
    #[must_use]
    pub fn timer_nesting_depth(&self) -> u32 { self.thread.nesting_depth }

    /// Enqueues a task to run in the current or next tick's task phase, bypassing
    /// the ingress queue (no lock, no wake) since we are already on the loop
    /// thread.
    pub fn submit_internal(&mut self, task: LocalTask) {
        self.thread.internal_tasks.push_back(task);
    }

    /// Queues a microtask: runs before this tick's timers and I/O, after the
    /// currently-executing callback returns.
    pub fn schedule_microtask(&mut self, task: LocalTask) {
        self.thread.microtasks.push(task);
    }

    pub(crate) fn enqueue_microtask(&mut self, task: LocalTask) {
        self.thread.microtasks.push(task);
    }

    /// Schedules a one-shot timer. Sub-4ms delays are clamped to 4ms once the
    /// scheduling context is ≥ 5 timer-nesting levels deep.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerIdExhausted`].
    pub fn schedule_timer(
        &mut self,
        delay: Duration,
        task: LocalTask,
    ) -> Result<u64, LoopError> {
        let id = self
            .shared
            .next_timer_id
            .allocate()
            .ok_or(LoopError::TimerIdExhausted)?;
        let (delay, level) = clamp_delay(delay, self.thread.nesting_depth);
        let when = self.tick_time().after(delay);
        self.thread.timers.schedule_timer(id, when, level, task);
        Ok(id)
    }

    /// Cancels a scheduled timer; its callback will never run.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`] for unknown, fired, or already-canceled ids.
    pub fn cancel_timer(&mut self, id: u64) -> Result<(), LoopError> {
        self.thread.timers.cancel_timer(id)
    }

    /// Batch cancel; result `i` corresponds to `ids[i]`.
    pub fn cancel_timers(&mut self, ids: &[u64]) -> Vec<Result<(), LoopError>> {
        self.thread.timers.cancel_timers(ids)
    }

    /// Schedules a repeating timer. The nesting clamp applies to every repeat.
    ///
    /// # Errors
    ///
    /// [`LoopError::IntervalIdExhausted`].
    pub fn schedule_interval(
        &mut self,
        every: Duration,
        callback: Box<dyn FnMut(&mut LoopCtx<'_>) + Send>,
    ) -> Result<u64, LoopError> {
        let id = self
            .shared
            .next_interval_id
            .allocate()
            .ok_or(LoopError::IntervalIdExhausted)?;
        let (delay, level) = clamp_delay(every, self.thread.nesting_depth);
        let when = self.tick_time().after(delay);
        self.thread
            .timers
            .schedule_interval(id, when, level, every, callback);
        Ok(id)
    }

    /// Cancels an interval. Callable from inside its own callback; the pending
    /// repeat is suppressed.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`].
    pub fn cancel_interval(&mut self, id: u64) -> Result<(), LoopError> {
        self.thread.timers.cancel_interval(id)
    }

    /// Schedules a callback for the immediate phase (after timers) of this tick.
    ///
    /// # Errors
    ///
    /// [`LoopError::ImmediateIdExhausted`].
    pub fn schedule_immediate(&mut self, task: LocalTask) -> Result<u64, LoopError> {
        let id = self
            .shared
            .next_immediate_id
            .allocate()
            .ok_or(LoopError::ImmediateIdExhausted)?;
        self.thread.immediates.schedule(id, task);
        Ok(id)
    }

    /// Cancels a pending immediate.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`].
    pub fn cancel_immediate(&mut self, id: u64) -> Result<(), LoopError> {
        self.thread.immediates.cancel(id)
    }

    /// Registers a file descriptor; the callback runs on this thread whenever the
    /// kernel reports matching readiness.
    ///
    /// # Errors
    ///
    /// See [`IoPoller::register`].
    #[cfg(unix)]
    pub fn register_fd(
        &mut self,
        fd: RawFd,
        interest: FdInterest,
        callback: FdCallback,
    ) -> Result<(), LoopError> {
        self.poller_mut()?.register(fd, interest, callback)
    }

    /// Replaces a registered descriptor's interest set.
    ///
    /// # Errors
    ///
    /// See [`IoPoller::modify`].
    #[cfg(unix)]
    pub fn modify_fd(&mut self, fd: RawFd, interest: FdInterest) -> Result<(), LoopError> {
        self.poller_mut()?.modify(fd, interest)
    }

    /// Drops a descriptor's registration and callback.
    ///
    /// # Errors
    ///
    /// See [`IoPoller::unregister`].
    #[cfg(unix)]
    pub fn unregister_fd(&mut self, fd: RawFd) -> Result<(), LoopError> {
        self.poller_mut()?.unregister(fd)
    }

    /// Mints a promise plus its thread-safe resolve/reject pair.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`] or [`LoopError::LoopTerminated`].
    pub fn new_promise(
        &mut self,
    ) -> Result<(PromiseHandle, PromiseResolver, PromiseRejecter), LoopError> {
        self.shared.mint_promise_with_settlers()
    }

    /// Resolves a promise *now*: reactions already attached are queued as
    /// microtasks before this call returns (they still execute asynchronously).
    /// This is the precise-ordering path for loop-thread code; the
    /// [`PromiseResolver`] goes through the settlement inbox instead.
    pub fn resolve_promise(&mut self, handle: &PromiseHandle, value: PromiseValue) {
        promise::machine::settle(self, &handle.promise.clone(), Ok(value));
    }

    /// Rejects a promise now. See [`Self::resolve_promise`] for ordering.
    pub fn reject_promise(&mut self, handle: &PromiseHandle, reason: PromiseValue) {
        promise::machine::settle(self, &handle.promise.clone(), Err(reason));
    }

    /// `Promise.all`.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`].
    pub fn promise_all(
        &mut self,
        inputs: &[PromiseHandle],
    ) -> Result<PromiseHandle, LoopError> {
        promise::all(self, inputs)
    }

    /// `Promise.race`.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`].
    pub fn promise_race(
        &mut self,
        inputs: &[PromiseHandle],
    ) -> Result<PromiseHandle, LoopError> {
        promise::race(self, inputs)
    }

    /// `Promise.any`.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`].
    pub fn promise_any(
        &mut self,
        inputs: &[PromiseHandle],
    ) -> Result<PromiseHandle, LoopError> {
        promise::any(self, inputs)
    }

    /// `Promise.allSettled`.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`].
    pub fn promise_all_settled(
        &mut self,
        inputs: &[PromiseHandle],
    ) -> Result<PromiseHandle, LoopError> {
        promise::all_settled(self, inputs)
    }

    /// Requests graceful shutdown; the loop drains and terminates after the
    /// current callback returns to the tick driver.
    pub fn shutdown(&mut self) { drop(self.shared.state.request_terminate()); }

    pub(crate) fn mint_promise(&mut self) -> Result<PromiseHandle, LoopError> {
        let id = self
            .shared
            .next_promise_id
            .allocate()
            .ok_or(LoopError::PromiseIdExhausted)?;
        Ok(self.shared.promises.register(id))
    }

    fn poller_mut(&mut self) -> Result<&mut IoPoller, LoopError> {
        self.thread.poller.as_mut().ok_or(LoopError::LoopNotRunning)
    }
}
