// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Owned callables and the uniform panic guard wrapped around every entry into user
//! code.
//!
//! The loop executes four kinds of user callbacks: external tasks, microtasks, timer
//! (and interval / immediate) callbacks, and promise reactions. All of them funnel
//! through [`run_guarded()`] so that a panic:
//!
//! 1. is caught (the loop never dies from user code),
//! 2. is logged with the callback kind,
//! 3. is returned to the call site as a payload, so timer scopes can restore the
//!    nesting depth and promise reactions can reject the derived child.

use crate::event_loop::LoopCtx;
use std::{any::Any,
          panic::{AssertUnwindSafe, catch_unwind}};

/// An owned, panic-recoverable callable submitted from any thread.
///
/// Ownership transfers at submit; the loop drops the box immediately after execution so
/// captured resources release promptly. The callback receives a [`LoopCtx`] granting
/// the full loop-thread operation surface (timers, microtasks, promises, FD
/// registration).
pub type Task = Box<dyn FnOnce(&mut LoopCtx<'_>) + Send + 'static>;

/// A callable created on the loop thread itself (microtasks, timer callbacks,
/// `submit_internal`). Same shape as [`Task`]; the distinction is the entry path -
/// these never cross the ingress queue. The [`Send`] bound stays because the loop
/// object itself (queues included) moves to whichever thread calls `run()`.
pub type LocalTask = Box<dyn FnOnce(&mut LoopCtx<'_>) + Send + 'static>;

/// What the loop captured when a callback panicked.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Which entry point into user code is being guarded. Used for log context only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TaskKind {
    #[strum(to_string = "task")]
    Task,
    #[strum(to_string = "microtask")]
    Microtask,
    #[strum(to_string = "timer")]
    Timer,
    #[strum(to_string = "interval")]
    Interval,
    #[strum(to_string = "immediate")]
    Immediate,
    #[strum(to_string = "promise reaction")]
    PromiseReaction,
    #[strum(to_string = "fd callback")]
    FdCallback,
}

/// Runs `task` under the panic guard. Returns the payload if the callback panicked.
///
/// The caller owns any invariant restoration (nesting depth, promise rejection) - this
/// function only catches and logs.
pub(crate) fn run_guarded(
    kind: TaskKind,
    ctx: &mut LoopCtx<'_>,
    task: LocalTask,
) -> Option<PanicPayload> {
    match catch_unwind(AssertUnwindSafe(|| task(ctx))) {
        Ok(()) => None,
        Err(payload) => {
            tracing::error!(
                callback_kind = %kind,
                panic_message = %panic_message(&payload),
                "user callback panicked; loop continues"
            );
            Some(payload)
        }
    }
}

/// Best-effort human-readable message from a panic payload.
///
/// `panic!("...")` produces a `&'static str`; `panic!("{x}")` produces a `String`;
/// anything else is opaque.
#[must_use]
pub fn panic_message(payload: &PanicPayload) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
