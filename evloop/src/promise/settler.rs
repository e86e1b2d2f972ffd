// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Producer-side settlement: the resolve/reject pair handed out by `new_promise`.
//!
//! Settlers work from any thread. They do not touch promise state directly -
//! settlement must enqueue reactions as microtasks, which only the loop thread may
//! do - so they post the outcome to the loop's settlement inbox and nudge the wake
//! signal. Code already running *on* the loop thread that wants same-checkpoint
//! precision uses [`LoopCtx::resolve_promise`] instead.
//!
//! Dropping both halves without settling is the early-abort signal: the promise
//! rejects with [`TaskAborted`], so a consumer never awaits a settlement that can
//! no longer arrive.
//!
//! [`LoopCtx::resolve_promise`]: crate::event_loop::LoopCtx::resolve_promise

use super::{PromiseValue, TaskAborted, machine::Promise, promise_value};
use crate::event_loop::LoopShared;
use std::sync::{Arc,
                atomic::{AtomicBool, Ordering}};

/// State shared by a resolver/rejecter pair. The last clone's drop performs the
/// abort check.
///
/// Holds the promise *strongly*: as long as someone can still settle a promise,
/// it must stay alive - the same reason a JS resolve function pins its promise.
/// (The registry's reference is the weak one.)
pub(crate) struct SettlerCore {
    promise: Arc<Promise>,
    shared: Arc<LoopShared>,
    settled: AtomicBool,
}

impl SettlerCore {
    fn settle(&self, outcome: Result<PromiseValue, PromiseValue>) {
        if self.settled.swap(true, Ordering::SeqCst) {
            // First settlement wins; everything after is a no-op.
            return;
        }
        self.shared
            .post_settlement(Arc::clone(&self.promise), outcome);
    }
}

impl Drop for SettlerCore {
    fn drop(&mut self) {
        if self.settled.load(Ordering::SeqCst) || self.promise.is_settled() {
            // Settled through a settler or the loop-thread path; nothing was
            // abandoned.
            return;
        }
        self.shared.post_settlement(
            Arc::clone(&self.promise),
            Err(promise_value(TaskAborted)),
        );
    }
}

/// Fulfills the paired promise. Cloneable; first settlement (across both halves)
/// wins.
#[derive(Clone)]
pub struct PromiseResolver {
    core: Arc<SettlerCore>,
}

impl std::fmt::Debug for PromiseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PromiseResolver")
    }
}

impl PromiseResolver {
    /// Resolves with `value`. A value wrapping a promise handle is adopted when the
    /// loop processes the settlement.
    pub fn resolve(&self, value: PromiseValue) { self.core.settle(Ok(value)); }
}

/// Rejects the paired promise.
#[derive(Clone)]
pub struct PromiseRejecter {
    core: Arc<SettlerCore>,
}

impl std::fmt::Debug for PromiseRejecter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PromiseRejecter")
    }
}

impl PromiseRejecter {
    pub fn reject(&self, reason: PromiseValue) { self.core.settle(Err(reason)); }
}

/// Builds the settler pair for a freshly minted promise.
pub(crate) fn new_settlers(
    promise: &Arc<Promise>,
    shared: Arc<LoopShared>,
) -> (PromiseResolver, PromiseRejecter) {
    let core = Arc::new(SettlerCore {
        promise: Arc::clone(promise),
        shared,
        settled: AtomicBool::new(false),
    });
    (
        PromiseResolver {
            core: Arc::clone(&core),
        },
        PromiseRejecter { core },
    )
}
