// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks

//! Scenario tests for the loop as a whole: ordering contracts, promise
//! semantics, timers and the nesting clamp, the producer protocol, and
//! shutdown.
//!
//! Two driving styles:
//! - **Manual pump** ([`pump()`]): `start()` the loop on the test thread and
//!   tick it by hand with a forced non-blocking poll. Fully deterministic; used
//!   for ordering assertions.
//! - **Real run**: spawn `run()` on a thread and interact through the handle.
//!   Used where the blocking/wake behavior itself is under test.

mod promise_tests;

#[cfg(unix)]
mod fd_tests;

use super::{EventLoop, EventLoopOptions, LoopHandle};
use std::sync::{Arc, Mutex};

/// A started (but not running) loop, ready for manual ticking on this thread.
pub(crate) fn started_loop(options: EventLoopOptions) -> (EventLoop, LoopHandle) {
    let (mut event_loop, handle) = EventLoop::new(options);
    event_loop.start().unwrap();
    (event_loop, handle)
}

/// One manual tick that is guaranteed not to block in the kernel.
pub(crate) fn pump(event_loop: &mut EventLoop) {
    event_loop.thread.force_non_blocking_poll = true;
    event_loop.tick_once().unwrap();
}

/// Shared execution-order recorder.
pub(crate) type OrderLog = Arc<Mutex<Vec<&'static str>>>;

pub(crate) fn order_log() -> OrderLog { Arc::new(Mutex::new(Vec::new())) }

pub(crate) fn record(log: &OrderLog, label: &'static str) {
    log.lock().unwrap().push(label);
}

pub(crate) fn recorded(log: &OrderLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}
