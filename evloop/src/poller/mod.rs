// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue eventfd EINTR

//! The I/O poller: readiness demultiplexing and the kernel-level wake primitive.
//!
//! [`mio`] provides the portable surface: [`mio::Poll`] wraps [`epoll`] on Linux and
//! [`kqueue`] on macOS/BSD (and the IOCP-backed selector on Windows), and
//! [`mio::Waker`] wraps the matching wake primitive (eventfd / self-pipe / posted
//! completion). The loop blocks in [`mio::Poll::poll()`] and is interrupted either
//! by FD readiness or by a waker write from a producer thread.
//!
//! Per-FD callbacks live in a table behind an `RwLock`: event dispatch reads,
//! register/unregister writes. Callbacks always run inline on the loop thread during
//! poll return - never on the registering thread.
//!
//! Transient conditions (`EINTR`) surface as "zero events", never as errors; a real
//! poll failure is fatal to the loop.
//!
//! [`epoll`]: https://man7.org/linux/man-pages/man7/epoll.7.html
//! [`kqueue`]: https://man.freebsd.org/cgi/man.cgi?query=kqueue

mod interest;
mod io_poller;

pub use interest::*;
pub use io_poller::*;
