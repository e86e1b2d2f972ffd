// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks EINTR

//! The tick orchestrator: one full iteration of the loop, phase by phase.
//!
//! ```text
//! ┌──────────────────────────── one tick ────────────────────────────┐
//! │ 1. refresh clock                                                 │
//! │ 2. task phase        (internal queue, then ingress, budgeted)    │
//! │ 3. microtask checkpoint      ◄── task-queued microtasks beat     │
//! │ 4. timer phase                   timers of the same tick         │
//! │ 5. immediate phase                                               │
//! │ 6. microtask checkpoint                                          │
//! │ 7. promise-registry scavenge (bounded batch)                     │
//! │ 8. I/O: non-blocking if work queued, else Check-Then-Sleep       │
//! │ 9. microtask checkpoint      (only if FD callbacks dispatched)   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Strict mode additionally runs a checkpoint after each discrete task, timer,
//! and immediate, per the HTML processing model; relaxed mode coalesces them at
//! the phase boundaries above. Either way the contract holds: every microtask
//! queued in this tick drains before the next tick's timers or I/O run.

use super::EventLoop;
use crate::{core::{SleepMode, TickTime, TimerWork, clamp_delay},
            error::LoopError,
            promise::machine,
            task::{LocalTask, TaskKind, panic_message, run_guarded}};
use std::{panic::{AssertUnwindSafe, catch_unwind},
          time::Duration};

impl EventLoop {
    /// One full tick. A returned error is fatal (poller failure); the caller
    /// transitions to terminating.
    pub(crate) fn tick_once(&mut self) -> Result<(), LoopError> {
        let now = self.shared.clock.refresh();

        self.task_phase();
        self.microtask_checkpoint();
        if self.shared.state.load().is_terminal() {
            // Shutdown arrived mid-tick. Later phases are the drain's problem:
            // timers are canceled, not fired; the poll must not block.
            return Ok(());
        }
        self.timer_phase(now);
        self.immediate_phase();
        self.microtask_checkpoint();
        if self.shared.state.load().is_terminal() {
            return Ok(());
        }

        drop(self.shared.promises.scavenge(self.thread.options.scavenge_batch));

        let dispatched = self.poll_phase()?;
        if dispatched > 0 {
            self.microtask_checkpoint();
        }
        Ok(())
    }

    pub(crate) fn run_local_task(&mut self, kind: TaskKind, task: LocalTask) {
        self.with_ctx(|ctx| drop(run_guarded(kind, ctx, task)));
    }

    /// Phase 2: the internal queue first (already loop-local), then the ingress
    /// queue up to the per-tick budget. Unconsumed budget overflow leaves the
    /// loop awake; nothing is dropped.
    fn task_phase(&mut self) {
        let budget = self.thread.options.ingress_tick_budget;
        let strict = self.thread.options.strict_microtask_ordering;
        let mut external_done = 0_usize;
        loop {
            if self.shared.state.load().is_terminal() {
                return;
            }
            if let Some(task) = self.thread.internal_tasks.pop_front() {
                self.run_local_task(TaskKind::Task, task);
                if strict {
                    self.microtask_checkpoint();
                }
                continue;
            }
            if budget.is_some_and(|limit| external_done >= limit) {
                return;
            }
            let Some(task) = self.shared.ingress.pop() else {
                return;
            };
            external_done += 1;
            self.run_local_task(TaskKind::Task, task);
            if strict {
                self.microtask_checkpoint();
            }
        }
    }

    /// Phase 4: fire everything expired as of this tick's time.
    ///
    /// The firing timer's nesting level is published on the loop for the duration
    /// of its callback (that is what the clamp reads) and restored unconditionally
    /// - `run_guarded` has already caught any panic by the time we restore.
    fn timer_phase(&mut self, now: TickTime) {
        let strict = self.thread.options.strict_microtask_ordering;
        // Fired intervals re-enter the heap only after the phase ends; requeueing
        // inline would make a 0ms interval due "now" again and spin this loop.
        let mut interval_requeues = Vec::new();
        loop {
            if self.shared.state.load().is_terminal() {
                break;
            }
            let Some(mut expired) = self.thread.timers.pop_expired(now) else {
                break;
            };
            let saved_depth = self.thread.nesting_depth;
            self.thread.nesting_depth = expired.nesting_level;

            let work = std::mem::replace(&mut expired.work, TimerWork::Taken);
            match work {
                TimerWork::Once(task) => {
                    self.with_ctx(|ctx| drop(run_guarded(TaskKind::Timer, ctx, task)));
                    self.thread.nesting_depth = saved_depth;
                    self.thread.timers.release_fired(expired);
                }
                TimerWork::Repeating { every, mut callback } => {
                    self.with_ctx(|ctx| {
                        if let Err(payload) =
                            catch_unwind(AssertUnwindSafe(|| callback(ctx)))
                        {
                            tracing::error!(
                                panic_message = %panic_message(&payload),
                                "interval callback panicked; loop continues"
                            );
                        }
                    });
                    self.thread.nesting_depth = saved_depth;
                    // The clamp applies to every repeat: a tight interval deep in
                    // a nesting chain degrades to 4ms just like a timer would.
                    let (delay, level) = clamp_delay(every, expired.nesting_level);
                    let next_when = self.shared.clock.tick_time().after(delay);
                    expired.work = TimerWork::Repeating { every, callback };
                    interval_requeues.push((expired, next_when, level));
                }
                TimerWork::Taken => debug_assert!(false, "expired timer without work"),
            }
            if strict {
                self.microtask_checkpoint();
            }
        }
        for (expired, next_when, level) in interval_requeues {
            drop(self.thread.timers.requeue_interval(expired, next_when, level));
        }
    }

    /// Phase 5: run the immediates that were queued before this phase started.
    fn immediate_phase(&mut self) {
        let strict = self.thread.options.strict_microtask_ordering;
        for (_id, task) in self.thread.immediates.take_phase_batch() {
            self.run_local_task(TaskKind::Immediate, task);
            if strict {
                self.microtask_checkpoint();
            }
        }
    }

    /// The WHATWG microtask checkpoint, bounded by the per-checkpoint budget.
    ///
    /// Settlements posted from other threads are folded in before every pop, so a
    /// producer-resolved promise's reactions join this checkpoint instead of
    /// waiting a full tick. Budget exhaustion forces the next poll non-blocking.
    pub(crate) fn microtask_checkpoint(&mut self) {
        let budget = self.thread.options.microtask_checkpoint_budget;
        let mut processed = 0_usize;
        loop {
            self.apply_posted_settlements();
            if processed >= budget {
                if !self.thread.microtasks.is_empty() {
                    self.thread.force_non_blocking_poll = true;
                }
                return;
            }
            let Some(task) = self.thread.microtasks.pop() else {
                return;
            };
            self.run_local_task(TaskKind::Microtask, task);
            processed += 1;
        }
    }

    /// Budget-free checkpoint for the shutdown drain.
    pub(crate) fn microtask_checkpoint_unbounded(&mut self) {
        loop {
            self.apply_posted_settlements();
            let Some(task) = self.thread.microtasks.pop() else {
                return;
            };
            self.run_local_task(TaskKind::Microtask, task);
        }
    }

    /// Applies settlements posted through the inbox by producer threads (or by
    /// settlers used on the loop thread).
    fn apply_posted_settlements(&mut self) {
        let pending = self.shared.take_settlements();
        for settlement in pending {
            self.with_ctx(|ctx| {
                machine::settle(ctx, &settlement.promise, settlement.outcome);
            });
        }
    }

    /// Phase 8: I/O dispatch with the Check-Then-Sleep protocol.
    ///
    /// Returns how many FD callbacks were dispatched.
    fn poll_phase(&mut self) -> Result<usize, LoopError> {
        let force = std::mem::replace(&mut self.thread.force_non_blocking_poll, false);
        let local_work = !self.thread.microtasks.is_empty()
            || !self.thread.internal_tasks.is_empty()
            || !self.thread.immediates.is_empty();
        if force || local_work {
            return self.poll_and_dispatch(Some(Duration::ZERO));
        }

        // Compute the sleep timeout against a fresh clock sample.
        let now = self.shared.clock.refresh();
        let timeout = self.thread.timers.next_due().map(|due| now.until(due));
        if timeout == Some(Duration::ZERO) {
            return self.poll_and_dispatch(Some(Duration::ZERO));
        }

        // Consume any leftover wake signal and re-arm the dedup flag BEFORE
        // publishing Sleeping - a producer that observes Sleeping must find
        // pending == 0 so its CAS wins and its syscall actually happens.
        self.drain_wake_channel();
        self.shared.wake.rearm();

        let use_channel = self.thread.options.fast_path_wake
            && self.shared.fd_count.load(std::sync::atomic::Ordering::SeqCst) == 0;
        self.shared.wake.set_sleep_mode(if use_channel {
            SleepMode::Channel
        } else {
            SleepMode::Poller
        });

        // Check-Then-Sleep, step 1: publish Sleeping (refused when terminating).
        if !self.shared.state.try_sleep() {
            self.shared.wake.set_sleep_mode(SleepMode::Awake);
            return Ok(0);
        }
        // Step 2+3: the ingress/inbox mutexes are the StoreLoad barrier; reading
        // a non-zero length here means a producer raced us - do not block.
        if self.shared.has_external_work() {
            self.shared.state.wake_up();
            self.shared.wake.set_sleep_mode(SleepMode::Awake);
            return self.poll_and_dispatch(Some(Duration::ZERO));
        }

        // Step 4: block.
        let result = if use_channel {
            self.sleep_on_channel(timeout);
            Ok(0)
        } else {
            self.poll_and_dispatch(timeout)
        };

        self.shared.state.wake_up();
        self.shared.wake.set_sleep_mode(SleepMode::Awake);
        self.drain_wake_channel();
        self.shared.wake.rearm();
        result
    }

    /// Polls the kernel selector and dispatches FD callbacks under the panic
    /// guard. A callback that unregistered a descriptor suppresses that
    /// descriptor's still-queued dispatch.
    fn poll_and_dispatch(&mut self, timeout: Option<Duration>) -> Result<usize, LoopError> {
        {
            let thread = &mut self.thread;
            let Some(poller) = thread.poller.as_mut() else {
                return Ok(0);
            };
            drop(poller.poll(timeout, &mut thread.ready_buffer)?);
        }

        let ready = std::mem::take(&mut self.thread.ready_buffer);
        let mut dispatched = 0_usize;
        for ready_fd in &ready {
            let still_registered = self
                .thread
                .poller
                .as_ref()
                .is_some_and(|poller| poller.is_registered(ready_fd.fd));
            if !still_registered {
                continue;
            }
            self.with_ctx(|ctx| {
                if let Err(payload) =
                    catch_unwind(AssertUnwindSafe(|| ready_fd.dispatch(ctx)))
                {
                    tracing::error!(
                        fd = ready_fd.fd,
                        panic_message = %panic_message(&payload),
                        "fd callback panicked; loop continues"
                    );
                }
            });
            dispatched += 1;
        }
        let mut ready = ready;
        ready.clear();
        self.thread.ready_buffer = ready;
        Ok(dispatched)
    }

    /// Blocks on the fast-path channel instead of the kernel selector.
    fn sleep_on_channel(&mut self, timeout: Option<Duration>) {
        let Some(wake_rx) = self.thread.wake_rx.as_ref() else {
            return;
        };
        match timeout {
            Some(timeout) => drop(wake_rx.recv_timeout(timeout)),
            None => drop(wake_rx.recv()),
        }
    }

    fn drain_wake_channel(&mut self) {
        if let Some(wake_rx) = self.thread.wake_rx.as_ref() {
            while wake_rx.try_recv().is_ok() {}
        }
    }
}
