// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! State shared between producer threads and the loop thread. See [`LoopShared`].

use super::{EventLoopOptions, LoopEvent, LoopState, state::AtomicLoopState};
use crate::{core::{IngressQueue, TickClock, WakeSignal, timer::MAX_SAFE_INTEGER},
            error::LoopError,
            promise::{PromiseHandle, PromiseRegistry, PromiseRejecter, PromiseResolver,
                      PromiseValue, machine::Promise, new_settlers},
            task::Task};
use std::{collections::VecDeque,
          sync::{Arc, Mutex,
                 atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering}},
          thread::ThreadId};
use tokio::sync::broadcast;

/// Monotonic id source. Ids start at 1; `allocate` refuses to pass
/// [`MAX_SAFE_INTEGER`] so ids stay exactly representable in a double and are never
/// reused.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl IdAllocator {
    pub(crate) fn allocate(&self) -> Option<u64> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        if id > MAX_SAFE_INTEGER { None } else { Some(id) }
    }
}

/// A settlement posted from off the loop thread, waiting for the loop to apply it.
///
/// Holds the promise strongly so a settlement in flight cannot race the last
/// handle drop - the job queue pins the promise, exactly as in a scripting
/// engine.
pub(crate) struct PendingSettlement {
    pub promise: Arc<Promise>,
    pub outcome: Result<PromiseValue, PromiseValue>,
}

impl std::fmt::Debug for PendingSettlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PendingSettlement")
    }
}

/// Everything producer threads may touch: lifecycle state, the clock, the ingress
/// queue, the wake signal, the promise registry, id allocators, and the lifecycle
/// broadcast. The loop-thread-only structures (microtask queue, timer heap, poller)
/// deliberately do *not* live here - they sit unshared inside the loop itself.
#[derive(Debug)]
pub struct LoopShared {
    pub(crate) state: AtomicLoopState,
    pub(crate) run_started: AtomicBool,
    pub(crate) clock: TickClock,
    pub(crate) ingress: IngressQueue,
    pub(crate) wake: WakeSignal,
    pub(crate) promises: PromiseRegistry,
    pub(crate) settlement_inbox: Mutex<VecDeque<PendingSettlement>>,
    pub(crate) next_timer_id: IdAllocator,
    pub(crate) next_interval_id: IdAllocator,
    pub(crate) next_immediate_id: IdAllocator,
    pub(crate) next_promise_id: IdAllocator,
    pub(crate) fd_count: Arc<AtomicUsize>,
    pub(crate) events_tx: broadcast::Sender<LoopEvent>,
    pub(crate) loop_thread: Mutex<Option<ThreadId>>,
}

impl LoopShared {
    pub(crate) fn new(options: &EventLoopOptions) -> Arc<Self> {
        let (events_tx, _events_rx) = broadcast::channel(options.event_channel_capacity);
        Arc::new(Self {
            state: AtomicLoopState::new(),
            run_started: AtomicBool::new(false),
            clock: TickClock::new(),
            ingress: IngressQueue::new(options.ingress_chunk_capacity),
            wake: WakeSignal::new(),
            promises: PromiseRegistry::new(),
            settlement_inbox: Mutex::new(VecDeque::new()),
            next_timer_id: IdAllocator::default(),
            next_interval_id: IdAllocator::default(),
            next_immediate_id: IdAllocator::default(),
            next_promise_id: IdAllocator::default(),
            fd_count: Arc::new(AtomicUsize::new(0)),
            events_tx,
            loop_thread: Mutex::new(None),
        })
    }

    /// The producer submit path: enqueue, then Write-Then-Check.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopNotRunning`] before `run()`, [`LoopError::LoopTerminated`]
    /// once shutdown began, [`LoopError::WakeChannelBroken`] when the task was
    /// enqueued but the sleeping loop could not be signaled.
    pub(crate) fn submit(&self, task: Task) -> Result<(), LoopError> {
        if !self.run_started.load(Ordering::SeqCst) {
            return Err(LoopError::LoopNotRunning);
        }
        if self.state.load().is_terminal() {
            return Err(LoopError::LoopTerminated);
        }
        // The enqueue is the "Write"; the ingress mutex inside push() is the
        // producer half of the StoreLoad barrier.
        self.ingress.push(task)?;
        if self.state.load() == LoopState::Sleeping {
            self.wake.notify()?;
        }
        Ok(())
    }

    /// Posts a settlement from any thread; the loop applies it at its next
    /// microtask checkpoint.
    pub(crate) fn post_settlement(
        &self,
        promise: Arc<Promise>,
        outcome: Result<PromiseValue, PromiseValue>,
    ) {
        if self.state.load() == LoopState::Terminated {
            // Reject-all already dealt with every tracked promise.
            return;
        }
        self.settlement_inbox
            .lock()
            .unwrap()
            .push_back(PendingSettlement { promise, outcome });
        if self.state.load() == LoopState::Sleeping {
            if let Err(error) = self.wake.notify() {
                tracing::warn!(%error, "could not wake loop for promise settlement");
            }
        }
    }

    /// Everything posted so far, in posting order.
    pub(crate) fn take_settlements(&self) -> VecDeque<PendingSettlement> {
        std::mem::take(&mut *self.settlement_inbox.lock().unwrap())
    }

    /// Whether any producer-visible work is queued. Both locks taken briefly - on
    /// the pre-sleep path this read is the "Check" of Check-Then-Sleep and the
    /// mutexes are its barrier.
    pub(crate) fn has_external_work(&self) -> bool {
        self.ingress.len() > 0 || !self.settlement_inbox.lock().unwrap().is_empty()
    }

    /// Mints a tracked promise plus its settler pair.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopTerminated`] after shutdown, or
    /// [`LoopError::PromiseIdExhausted`].
    pub(crate) fn mint_promise_with_settlers(
        self: &Arc<Self>,
    ) -> Result<(PromiseHandle, PromiseResolver, PromiseRejecter), LoopError> {
        if self.state.load() == LoopState::Terminated {
            return Err(LoopError::LoopTerminated);
        }
        let id = self
            .next_promise_id
            .allocate()
            .ok_or(LoopError::PromiseIdExhausted)?;
        let handle = self.promises.register(id);
        let (resolver, rejecter) = new_settlers(&handle.promise, Arc::clone(self));
        Ok((handle, resolver, rejecter))
    }

    pub(crate) fn set_loop_thread(&self) {
        *self.loop_thread.lock().unwrap() = Some(std::thread::current().id());
    }

    #[must_use]
    pub(crate) fn is_loop_thread(&self) -> bool {
        *self.loop_thread.lock().unwrap() == Some(std::thread::current().id())
    }

    pub(crate) fn broadcast(&self, event: LoopEvent) {
        // No receivers is fine; lifecycle events are advisory.
        drop(self.events_tx.send(event));
    }
}
