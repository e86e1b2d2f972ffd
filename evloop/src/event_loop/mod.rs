// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words microtask microtasks epoll kqueue

//! The loop itself: lifecycle, the tick orchestrator, and the two operation
//! surfaces.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     SINGLE-THREADED EVENT LOOP                        │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │  LoopShared (Arc; producers + loop)      LoopThreadState (unshared)   │
//! │  ├── AtomicLoopState                     ├── MicrotaskQueue           │
//! │  ├── TickClock       (atomic reads)      ├── TimerRegistry (heap+map) │
//! │  ├── IngressQueue    (mutex = barrier)   ├── ImmediateQueue           │
//! │  ├── WakeSignal      (CAS dedup)         ├── IoPoller (mio)           │
//! │  ├── PromiseRegistry (weak refs)         ├── internal task queue      │
//! │  └── settlement inbox                    └── nesting depth            │
//! │                                                                       │
//! │  LoopHandle (any thread)                 LoopCtx (loop thread only)   │
//! │  submit / wake / shutdown /              timers, microtasks, FDs,     │
//! │  new_promise / subscribe                 promises, submit_internal    │
//! │                                                                       │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The split is the design: everything producers may touch lives in
//! [`LoopShared`] behind atomics or short mutexes, while everything hot lives
//! unshared in the loop and is reached only through a [`LoopCtx`] borrow. There
//! is no way to get a `LoopCtx` off the loop thread, so the lock-free structures
//! need no runtime checks.
//!
//! # Ordering Contract
//!
//! Within one tick: external tasks → their microtasks → expired timers →
//! immediates → remaining microtasks → I/O callbacks → their microtasks. FIFO
//! within each queue; timers with equal deadlines fire in schedule order. Every
//! microtask queued during a tick runs before any timer or I/O callback of the
//! *next* tick - the WHATWG microtask checkpoint contract.
//!
//! # No Lost Wake-Ups
//!
//! The loop sleeps in the kernel (or on the fast-path channel) only after
//! publishing `Sleeping` and *then* re-reading the ingress length under the
//! ingress mutex; producers enqueue first and read the state afterwards. See
//! [`crate::core::wake`] for the full argument and the wake-deduplication CAS.

// Attach sources.
pub mod ctx;
pub mod event_loop;
pub mod handle;
pub mod loop_event;
pub mod options;
pub mod shared;
pub mod state;
pub mod tick;

// Re-export.
pub use ctx::*;
pub use event_loop::*;
pub use handle::*;
pub use loop_event::*;
pub use options::*;
pub use shared::*;
pub use state::*;

#[cfg(test)]
mod tests;
