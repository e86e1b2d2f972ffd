// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words evloop microtask microtasks epoll kqueue eventfd combinators

//! # `r3bl_evloop`
//!
//! A single-threaded cooperative event-loop runtime core implementing the
//! execution semantics scripts expect from ECMA-262 and WHATWG HTML: a task
//! queue, the microtask checkpoint, timers with the HTML5 nesting clamp, and a
//! promise machine with chaining and combinators - plus the producer↔loop
//! synchronization protocol that makes external submission lost-wake-up-free.
//!
//! The loop runs on one dedicated OS thread. Producer threads submit work through
//! a chunked MPSC ingress queue and wake the (possibly kernel-blocked) loop via a
//! deduplicated wake signal over [`mio`]'s waker (eventfd on Linux, pipe on the
//! BSDs, posted completion on Windows). When no user file descriptors are
//! registered, a single-slot channel replaces the kernel round trip entirely.
//!
//! This crate is engine-agnostic by design: it exposes tasks, timers, microtasks,
//! FD callbacks, and promises over plain closures and type-erased values. Binding
//! a scripting runtime on top is a thin facade's job, not this crate's.
//!
//! ## Quick Start
//!
//! ```no_run
//! use r3bl_evloop::{EventLoop, EventLoopOptions};
//! use std::time::Duration;
//!
//! let (event_loop, handle) = EventLoop::new(EventLoopOptions::default());
//! let loop_thread = std::thread::spawn(move || event_loop.run());
//!
//! handle.submit(Box::new(|ctx| {
//!     // Runs on the loop thread, with the full scheduling surface.
//!     ctx.schedule_microtask(Box::new(|_ctx| println!("microtask")));
//!     let _id = ctx.schedule_timer(
//!         Duration::from_millis(5),
//!         Box::new(|ctx| {
//!             println!("timer");
//!             ctx.shutdown();
//!         }),
//!     );
//! }))?;
//!
//! loop_thread.join().unwrap()?;
//! # Ok::<(), r3bl_evloop::LoopError>(())
//! ```
//!
//! ## Module Map
//!
//! | Module         | What lives there                                          |
//! | :------------- | :-------------------------------------------------------- |
//! | [`core`]       | Clock, wake signal, ingress queue, microtask queue, timers |
//! | [`poller`]     | The mio-backed readiness poller and FD callback table     |
//! | [`promise`]    | Promise machine, combinators, weak-ref registry           |
//! | [`event_loop`] | Tick orchestrator, lifecycle, `LoopHandle` / `LoopCtx`    |
//! | [`error`]      | The [`LoopError`] surface                                 |

// Attach sources.
pub mod core;
pub mod error;
pub mod event_loop;
pub mod poller;
pub mod promise;
pub mod task;

// Re-export.
pub use crate::core::{SleepMode, TickClock, TickTime, clamp_delay,
                      timer::{MAX_SAFE_INTEGER, MIN_CLAMPED_DELAY,
                              NESTING_CLAMP_THRESHOLD}};
pub use error::*;
pub use event_loop::{EventLoop, EventLoopOptions, LoopCtx, LoopEvent, LoopHandle,
                     LoopState, ShutdownCause};
pub use poller::{FdCallback, FdInterest, FdReadiness};
pub use promise::{AggregateError, LoopShuttingDown, PanicReason, PromiseHandle,
                  PromiseRejecter, PromiseResolver, PromiseStateKind, PromiseValue,
                  SettledResult, TaskAborted, promise_value, value_as};
pub use task::{LocalTask, Task, TaskKind};
