// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words thenable

//! Promise state, reaction records, and the settlement procedure. See
//! [`PromiseHandle`] and [`settle()`].

use super::{PanicReason, PromiseValue, promise_value};
use crate::{error::LoopError,
            event_loop::LoopCtx,
            task::{PanicPayload, panic_message}};
use smallvec::SmallVec;
use std::{panic::{AssertUnwindSafe, catch_unwind},
          sync::{Arc, Mutex}};

/// A fulfillment or rejection handler. Receives the parent's settlement, returns the
/// derived child's resolution value (returning a [`PromiseHandle`] wrapped as a value
/// chains into it). A panic rejects the child with [`PanicReason`].
pub type ReactionFn =
    Box<dyn FnOnce(&mut LoopCtx<'_>, PromiseValue) -> PromiseValue + Send>;

/// A `finally` handler: runs on either settlement, sees neither value nor reason,
/// and passes the parent's settlement through to the child unless it panics.
pub type FinallyFn = Box<dyn FnOnce(&mut LoopCtx<'_>) + Send>;

/// Internal observer used by combinators: sees the raw settlement, produces no
/// child.
pub(crate) type WatchFn =
    Box<dyn FnOnce(&mut LoopCtx<'_>, Result<PromiseValue, PromiseValue>) + Send>;

/// One attached reaction record.
pub(crate) enum Reaction {
    Then {
        on_fulfilled: Option<ReactionFn>,
        on_rejected: Option<ReactionFn>,
        child: Arc<Promise>,
    },
    Finally {
        on_finally: FinallyFn,
        child: Arc<Promise>,
    },
    Watch {
        watch: WatchFn,
    },
}

pub(crate) enum PromiseState {
    Pending,
    Fulfilled(PromiseValue),
    Rejected(PromiseValue),
}

/// Observable state without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PromiseStateKind {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) struct PromiseInner {
    pub(crate) state: PromiseState,
    /// Slot-0 + overflow: the one-reaction case (by far the most common) costs no
    /// allocation beyond the promise itself.
    pub(crate) reactions: SmallVec<[Reaction; 1]>,
}

/// The promise object. Shared: the caller's [`PromiseHandle`]s hold it strongly,
/// the registry weakly.
pub struct Promise {
    pub(crate) id: u64,
    pub(crate) inner: Mutex<PromiseInner>,
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id)
            .field("state", &self.state_kind())
            .finish()
    }
}

impl Promise {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            inner: Mutex::new(PromiseInner {
                state: PromiseState::Pending,
                reactions: SmallVec::new(),
            }),
        })
    }

    #[must_use]
    pub fn state_kind(&self) -> PromiseStateKind {
        match self.inner.lock().unwrap().state {
            PromiseState::Pending => PromiseStateKind::Pending,
            PromiseState::Fulfilled(_) => PromiseStateKind::Fulfilled,
            PromiseState::Rejected(_) => PromiseStateKind::Rejected,
        }
    }

    /// Whether settlement already happened. The scavenger reads this without ever
    /// holding a strong reference past the check.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.lock().unwrap().state, PromiseState::Pending)
    }
}

/// A strong, cloneable reference to a promise.
///
/// All chaining operations go through a [`LoopCtx`], which both pins them to the
/// loop thread and gives them the microtask queue to schedule reactions on.
#[derive(Clone)]
pub struct PromiseHandle {
    pub(crate) promise: Arc<Promise>,
}

impl std::fmt::Debug for PromiseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.promise.fmt(f)
    }
}

impl PromiseHandle {
    #[must_use]
    pub fn id(&self) -> u64 { self.promise.id }

    #[must_use]
    pub fn state(&self) -> PromiseStateKind { self.promise.state_kind() }

    /// The settlement, if any. `Ok` = fulfilled value, `Err` = rejection reason.
    #[must_use]
    pub fn settlement(&self) -> Option<Result<PromiseValue, PromiseValue>> {
        match &self.promise.inner.lock().unwrap().state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(Arc::clone(value))),
            PromiseState::Rejected(reason) => Some(Err(Arc::clone(reason))),
        }
    }

    /// Attaches fulfillment/rejection handlers, returning the derived child.
    ///
    /// The handlers run as microtasks, in attachment order, never synchronously
    /// inside this call - even when `self` is already settled.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`] when no id is left for the child.
    pub fn then(
        &self,
        ctx: &mut LoopCtx<'_>,
        on_fulfilled: Option<ReactionFn>,
        on_rejected: Option<ReactionFn>,
    ) -> Result<PromiseHandle, LoopError> {
        let child = ctx.mint_promise()?;
        attach(
            ctx,
            &self.promise,
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                child: Arc::clone(&child.promise),
            },
        );
        Ok(child)
    }

    /// `catch(f)` ≡ `then(None, Some(f))`.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`] when no id is left for the child.
    pub fn catch(
        &self,
        ctx: &mut LoopCtx<'_>,
        on_rejected: ReactionFn,
    ) -> Result<PromiseHandle, LoopError> {
        self.then(ctx, None, Some(on_rejected))
    }

    /// Attaches a `finally` handler: observes settlement without consuming it.
    ///
    /// # Errors
    ///
    /// [`LoopError::PromiseIdExhausted`] when no id is left for the child.
    pub fn finally(
        &self,
        ctx: &mut LoopCtx<'_>,
        on_finally: FinallyFn,
    ) -> Result<PromiseHandle, LoopError> {
        let child = ctx.mint_promise()?;
        attach(
            ctx,
            &self.promise,
            Reaction::Finally {
                on_finally,
                child: Arc::clone(&child.promise),
            },
        );
        Ok(child)
    }
}

/// Attaches a reaction, queueing it immediately when the parent is already settled.
pub(crate) fn attach(ctx: &mut LoopCtx<'_>, parent: &Arc<Promise>, reaction: Reaction) {
    let queued_settlement = {
        let mut guard = parent.inner.lock().unwrap();
        let inner = &mut *guard;
        match &inner.state {
            PromiseState::Pending => {
                inner.reactions.push(reaction);
                None
            }
            PromiseState::Fulfilled(value) => Some((reaction, Ok(Arc::clone(value)))),
            PromiseState::Rejected(reason) => Some((reaction, Err(Arc::clone(reason)))),
        }
    };
    if let Some((reaction, settlement)) = queued_settlement {
        enqueue_reaction(ctx, reaction, settlement);
    }
}

/// The resolution procedure.
///
/// `Ok(value)` resolves: a value wrapping a [`PromiseHandle`] is *adopted* (the
/// target settles when the inner promise does); anything else fulfills directly.
/// `Err(reason)` always rejects directly - rejection reasons are never adopted.
/// Settling an already-settled promise is a no-op.
pub(crate) fn settle(
    ctx: &mut LoopCtx<'_>,
    promise: &Arc<Promise>,
    outcome: Result<PromiseValue, PromiseValue>,
) {
    if let Ok(value) = &outcome {
        if let Some(inner_handle) = value.downcast_ref::<PromiseHandle>() {
            if Arc::ptr_eq(&inner_handle.promise, promise) {
                // A promise cannot adopt itself; that chain would never settle.
                let reason = promise_value(PanicReason {
                    message: "promise resolved with itself".to_string(),
                });
                settle_direct(ctx, promise, Err(reason));
                return;
            }
            let outer = Arc::clone(promise);
            attach(
                ctx,
                &inner_handle.promise.clone(),
                Reaction::Watch {
                    watch: Box::new(move |ctx, settlement| {
                        settle_direct(ctx, &outer, settlement);
                    }),
                },
            );
            return;
        }
    }
    settle_direct(ctx, promise, outcome);
}

/// Writes the settlement and queues every attached reaction. No adoption.
pub(crate) fn settle_direct(
    ctx: &mut LoopCtx<'_>,
    promise: &Arc<Promise>,
    outcome: Result<PromiseValue, PromiseValue>,
) {
    let (reactions, settlement) = {
        let mut inner = promise.inner.lock().unwrap();
        if !matches!(inner.state, PromiseState::Pending) {
            return;
        }
        let settlement = match &outcome {
            Ok(value) => {
                inner.state = PromiseState::Fulfilled(Arc::clone(value));
                Ok(Arc::clone(value))
            }
            Err(reason) => {
                inner.state = PromiseState::Rejected(Arc::clone(reason));
                Err(Arc::clone(reason))
            }
        };
        (std::mem::take(&mut inner.reactions), settlement)
    };
    // Enqueue outside the lock: reaction closures may touch this promise again.
    for reaction in reactions {
        enqueue_reaction(ctx, reaction, clone_settlement(&settlement));
    }
}

fn clone_settlement(
    settlement: &Result<PromiseValue, PromiseValue>,
) -> Result<PromiseValue, PromiseValue> {
    match settlement {
        Ok(value) => Ok(Arc::clone(value)),
        Err(reason) => Err(Arc::clone(reason)),
    }
}

fn enqueue_reaction(
    ctx: &mut LoopCtx<'_>,
    reaction: Reaction,
    settlement: Result<PromiseValue, PromiseValue>,
) {
    ctx.enqueue_microtask(Box::new(move |ctx| {
        run_reaction(ctx, reaction, settlement);
    }));
}

/// Executes one reaction. This is the microtask body.
fn run_reaction(
    ctx: &mut LoopCtx<'_>,
    reaction: Reaction,
    settlement: Result<PromiseValue, PromiseValue>,
) {
    match reaction {
        Reaction::Then {
            on_fulfilled,
            on_rejected,
            child,
        } => match settlement {
            Ok(value) => match on_fulfilled {
                Some(handler) => call_handler(ctx, &child, handler, value),
                // Elided handler: fulfillment passes through.
                None => settle(ctx, &child, Ok(value)),
            },
            Err(reason) => match on_rejected {
                // A rejection handler's return value *fulfills* the child.
                Some(handler) => call_handler(ctx, &child, handler, reason),
                // Elided handler: rejection passes through.
                None => settle(ctx, &child, Err(reason)),
            },
        },
        Reaction::Finally { on_finally, child } => {
            match catch_unwind(AssertUnwindSafe(|| on_finally(ctx))) {
                Ok(()) => settle(ctx, &child, settlement),
                Err(payload) => reject_with_panic(ctx, &child, &payload),
            }
        }
        Reaction::Watch { watch } => {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| watch(ctx, settlement)))
            {
                // Watchers are internal (combinators); a panic here is a bug, not
                // user code. Log and keep the loop alive.
                tracing::error!(
                    panic_message = %panic_message(&payload),
                    "internal promise watcher panicked"
                );
            }
        }
    }
}

fn call_handler(
    ctx: &mut LoopCtx<'_>,
    child: &Arc<Promise>,
    handler: ReactionFn,
    input: PromiseValue,
) {
    match catch_unwind(AssertUnwindSafe(|| handler(ctx, input))) {
        Ok(output) => settle(ctx, child, Ok(output)),
        Err(payload) => {
            tracing::error!(
                panic_message = %panic_message(&payload),
                "promise reaction panicked; rejecting derived promise"
            );
            reject_with_panic(ctx, child, &payload);
        }
    }
}

fn reject_with_panic(ctx: &mut LoopCtx<'_>, child: &Arc<Promise>, payload: &PanicPayload) {
    let reason = promise_value(PanicReason {
        message: panic_message(payload),
    });
    settle_direct(ctx, child, Err(reason));
}
