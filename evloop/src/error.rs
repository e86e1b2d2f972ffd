// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EBADF EPIPE eventfd ulimit

//! Error surface for the event-loop core. See [`LoopError`].
//!
//! Callers on producer threads receive these synchronously from the operation that
//! failed; nothing ever unwinds across the loop boundary. Caller errors (bad id, wrong
//! state) are returned without logging; fatal runtime errors are logged at `error!`
//! before they propagate out of `run()`.

/// All failure modes reported by the event-loop core.
///
/// The variants fall into the taxonomy below. Note that transient OS conditions
/// (`EINTR` on poll, `EAGAIN` while draining the wake channel) are *not* represented
/// here - they are swallowed and retried internally.
///
/// | Group              | Variants                                                        |
/// | :----------------- | :-------------------------------------------------------------- |
/// | Lifecycle          | [`LoopTerminated`], [`LoopAlreadyRunning`], [`LoopNotRunning`]  |
/// | Scheduling ids     | [`TimerNotFound`], [`TimerIdExhausted`], [`ImmediateIdExhausted`], [`IntervalIdExhausted`], [`PromiseIdExhausted`] |
/// | Poller             | [`PollerClosed`], [`FdOutOfRange`], [`FdAlreadyRegistered`], [`FdNotRegistered`] |
/// | Fatal runtime      | [`WakeChannelBroken`], [`Poller`]                               |
///
/// [`LoopTerminated`]: Self::LoopTerminated
/// [`LoopAlreadyRunning`]: Self::LoopAlreadyRunning
/// [`LoopNotRunning`]: Self::LoopNotRunning
/// [`TimerNotFound`]: Self::TimerNotFound
/// [`TimerIdExhausted`]: Self::TimerIdExhausted
/// [`ImmediateIdExhausted`]: Self::ImmediateIdExhausted
/// [`IntervalIdExhausted`]: Self::IntervalIdExhausted
/// [`PromiseIdExhausted`]: Self::PromiseIdExhausted
/// [`PollerClosed`]: Self::PollerClosed
/// [`FdOutOfRange`]: Self::FdOutOfRange
/// [`FdAlreadyRegistered`]: Self::FdAlreadyRegistered
/// [`FdNotRegistered`]: Self::FdNotRegistered
/// [`WakeChannelBroken`]: Self::WakeChannelBroken
/// [`Poller`]: Self::Poller
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum LoopError {
    /// The loop has begun (or finished) its graceful drain; no new external
    /// submissions are accepted.
    #[error("Event loop is terminated; no new work is accepted")]
    #[diagnostic(
        code(r3bl_evloop::lifecycle::terminated),
        help(
            "The loop has shut down (or shutdown is in progress). Work submitted \
             before shutdown still drains to completion; new submissions are refused."
        )
    )]
    LoopTerminated,

    /// `run()` was called while another `run()` is still active.
    #[error("Event loop is already running")]
    #[diagnostic(
        code(r3bl_evloop::lifecycle::already_running),
        help("A loop instance owns exactly one OS thread. Call run() at most once.")
    )]
    LoopAlreadyRunning,

    /// The operation requires a running loop, but `run()` has not started yet.
    #[error("Event loop is not running")]
    #[diagnostic(
        code(r3bl_evloop::lifecycle::not_running),
        help("Start the loop with run() before submitting work or scheduling timers.")
    )]
    LoopNotRunning,

    /// No timer (or interval / immediate) with the given id exists. The id may have
    /// already fired, been canceled, or never been issued.
    #[error("No timer with id {id}")]
    #[diagnostic(code(r3bl_evloop::timer::not_found))]
    TimerNotFound {
        /// The id that failed to resolve.
        id: u64,
    },

    /// The timer id space is exhausted.
    ///
    /// Ids are strictly increasing and never reused, so after
    /// `9_007_199_254_740_991` (the largest integer a double represents exactly)
    /// further scheduling fails rather than silently wrapping.
    #[error("Timer id space exhausted")]
    #[diagnostic(
        code(r3bl_evloop::timer::id_exhausted),
        help("Timer ids are never reused. Restart the loop to reset the id space.")
    )]
    TimerIdExhausted,

    /// The immediate id space is exhausted. Same policy as [`Self::TimerIdExhausted`].
    #[error("Immediate id space exhausted")]
    #[diagnostic(code(r3bl_evloop::immediate::id_exhausted))]
    ImmediateIdExhausted,

    /// The interval id space is exhausted. Same policy as [`Self::TimerIdExhausted`].
    #[error("Interval id space exhausted")]
    #[diagnostic(code(r3bl_evloop::interval::id_exhausted))]
    IntervalIdExhausted,

    /// The promise id space is exhausted. Same policy as [`Self::TimerIdExhausted`].
    #[error("Promise id space exhausted")]
    #[diagnostic(code(r3bl_evloop::promise::id_exhausted))]
    PromiseIdExhausted,

    /// The poller has been closed; all operations except close fail.
    #[error("I/O poller is closed")]
    #[diagnostic(code(r3bl_evloop::poller::closed))]
    PollerClosed,

    /// The file descriptor is negative or otherwise outside the registrable range.
    #[error("File descriptor {fd} is out of range")]
    #[diagnostic(code(r3bl_evloop::poller::fd_out_of_range))]
    FdOutOfRange {
        /// The offending descriptor.
        fd: i64,
    },

    /// The file descriptor already has a registration.
    #[error("File descriptor {fd} is already registered")]
    #[diagnostic(
        code(r3bl_evloop::poller::fd_already_registered),
        help("Use modify_fd() to change the interest set of a registered descriptor.")
    )]
    FdAlreadyRegistered {
        /// The offending descriptor.
        fd: i64,
    },

    /// The file descriptor has no registration.
    #[error("File descriptor {fd} is not registered")]
    #[diagnostic(code(r3bl_evloop::poller::fd_not_registered))]
    FdNotRegistered {
        /// The offending descriptor.
        fd: i64,
    },

    /// The wake-up primitive failed in a non-transient way (e.g. `EPIPE`/`EBADF` on a
    /// half-open pipe). This is fatal: the loop transitions to terminating.
    #[error("Wake-up channel is broken")]
    #[diagnostic(
        code(r3bl_evloop::wake::channel_broken),
        help(
            "The eventfd/pipe backing wake() failed with a non-transient error. \
             The loop cannot be woken reliably and will shut down."
        )
    )]
    WakeChannelBroken,

    /// A fatal poller error (e.g. `EBADF` from the OS selector). The loop transitions
    /// to terminating and this propagates out of `run()`.
    #[error("Fatal I/O poller error")]
    #[diagnostic(
        code(r3bl_evloop::poller::fatal),
        help(
            "Check OS resource limits - `ulimit -n` for file descriptors. \
             A closed or corrupted selector fd cannot be recovered in place."
        )
    )]
    Poller(#[source] std::io::Error),
}
