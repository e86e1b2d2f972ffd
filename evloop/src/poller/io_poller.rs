// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR deregister deregistered

//! The poller itself. See [`IoPoller`].

use super::{FdInterest, FdReadiness};
use crate::{error::LoopError, event_loop::LoopCtx};
use std::{collections::HashMap,
          io,
          sync::{Arc, Mutex, RwLock,
                 atomic::{AtomicUsize, Ordering}},
          time::Duration};

#[cfg(unix)]
use std::os::fd::RawFd;
#[cfg(not(unix))]
type RawFd = i32;

/// Token reserved for the wake primitive. FD tokens are the fd value itself, so this
/// sits far outside the valid fd range.
pub const WAKE_TOKEN: mio::Token = mio::Token(usize::MAX);

/// A registered descriptor's callback. Runs inline on the loop thread with the
/// readiness bits the kernel reported.
pub type FdCallback = Box<dyn FnMut(&mut LoopCtx<'_>, FdReadiness) + Send>;

struct FdEntry {
    interest: FdInterest,
    callback: Arc<Mutex<FdCallback>>,
}

/// One descriptor's worth of dispatch work, checked out of a poll cycle.
///
/// Holds a clone of the callback handle rather than a table borrow, so the table
/// lock is released before any user code runs (a callback may itself register or
/// unregister descriptors).
pub struct ReadyFd {
    pub fd: RawFd,
    pub readiness: FdReadiness,
    pub(crate) callback: Arc<Mutex<FdCallback>>,
}

impl std::fmt::Debug for ReadyFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyFd")
            .field("fd", &self.fd)
            .field("readiness", &self.readiness)
            .finish()
    }
}

impl ReadyFd {
    /// Runs the callback. Called by the tick orchestrator under the panic guard.
    ///
    /// A previous panic inside this callback poisons its mutex; the callback
    /// itself is still structurally intact (the panic was caught at the dispatch
    /// site), so poison is cleared rather than treated as fatal.
    pub(crate) fn dispatch(&self, ctx: &mut LoopCtx<'_>) {
        let mut callback = self
            .callback
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (callback)(ctx, self.readiness);
    }
}

/// What one poll cycle produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollOutcome {
    /// Ready descriptors collected for dispatch.
    pub ready_count: usize,
    /// Whether the wake token fired.
    pub woken: bool,
}

/// Owns the OS selector, the events buffer, the wake primitive, and the per-FD
/// callback table.
///
/// Created by `run()` on the loop thread; `poll()` and the FD operations are
/// loop-thread calls, while the cloned [`mio::Waker`] handed to
/// [`crate::core::wake::WakeSignal`] is what producer threads touch.
pub struct IoPoller {
    poll: mio::Poll,
    events: mio::Events,
    waker: Arc<mio::Waker>,
    fd_table: RwLock<HashMap<RawFd, FdEntry>>,
    /// Shared with the loop's sleep-mode decision: zero registered FDs enables the
    /// fast-path wake channel.
    fd_count: Arc<AtomicUsize>,
    closed: bool,
}

impl std::fmt::Debug for IoPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoPoller")
            .field("fd_count", &self.fd_count.load(Ordering::SeqCst))
            .field("closed", &self.closed)
            .finish()
    }
}

impl IoPoller {
    /// Creates the selector, events buffer, and wake primitive together - the waker
    /// is bound to this poll's registry and is useless with any other.
    ///
    /// # Errors
    ///
    /// [`LoopError::Poller`] when the OS refuses the selector or waker fd.
    pub fn new(
        events_capacity: usize,
        fd_count: Arc<AtomicUsize>,
    ) -> Result<Self, LoopError> {
        let poll = mio::Poll::new().map_err(LoopError::Poller)?;
        let waker = mio::Waker::new(poll.registry(), WAKE_TOKEN)
            .map_err(LoopError::Poller)?;
        Ok(Self {
            poll,
            events: mio::Events::with_capacity(events_capacity),
            waker: Arc::new(waker),
            fd_table: RwLock::new(HashMap::new()),
            fd_count,
            closed: false,
        })
    }

    /// The wake primitive, for installation into the producer-facing wake signal.
    #[must_use]
    pub fn waker(&self) -> Arc<mio::Waker> { Arc::clone(&self.waker) }

    /// Registers a descriptor with the kernel selector and records its callback.
    ///
    /// # Errors
    ///
    /// - [`LoopError::PollerClosed`] after [`close()`].
    /// - [`LoopError::FdOutOfRange`] for negative descriptors.
    /// - [`LoopError::FdAlreadyRegistered`] on double registration.
    /// - [`LoopError::Poller`] when the kernel rejects the registration.
    ///
    /// [`close()`]: Self::close
    #[cfg(unix)]
    pub fn register(
        &mut self,
        fd: RawFd,
        interest: FdInterest,
        callback: FdCallback,
    ) -> Result<(), LoopError> {
        self.ensure_open()?;
        Self::ensure_fd_in_range(fd)?;
        let mut table = self.fd_table.write().unwrap();
        if table.contains_key(&fd) {
            return Err(LoopError::FdAlreadyRegistered { fd: i64::from(fd) });
        }
        self.poll
            .registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(usize::try_from(fd).expect("non-negative fd")),
                interest.as_mio(),
            )
            .map_err(LoopError::Poller)?;
        table.insert(
            fd,
            FdEntry {
                interest,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        self.fd_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Replaces the interest set of a registered descriptor.
    ///
    /// # Errors
    ///
    /// [`LoopError::PollerClosed`], [`LoopError::FdOutOfRange`],
    /// [`LoopError::FdNotRegistered`], or [`LoopError::Poller`].
    #[cfg(unix)]
    pub fn modify(&mut self, fd: RawFd, interest: FdInterest) -> Result<(), LoopError> {
        self.ensure_open()?;
        Self::ensure_fd_in_range(fd)?;
        let mut table = self.fd_table.write().unwrap();
        let Some(entry) = table.get_mut(&fd) else {
            return Err(LoopError::FdNotRegistered { fd: i64::from(fd) });
        };
        self.poll
            .registry()
            .reregister(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(usize::try_from(fd).expect("non-negative fd")),
                interest.as_mio(),
            )
            .map_err(LoopError::Poller)?;
        entry.interest = interest;
        Ok(())
    }

    /// Removes a descriptor from the selector and drops its callback.
    ///
    /// # Errors
    ///
    /// [`LoopError::PollerClosed`], [`LoopError::FdOutOfRange`], or
    /// [`LoopError::FdNotRegistered`].
    #[cfg(unix)]
    pub fn unregister(&mut self, fd: RawFd) -> Result<(), LoopError> {
        self.ensure_open()?;
        Self::ensure_fd_in_range(fd)?;
        let mut table = self.fd_table.write().unwrap();
        if table.remove(&fd).is_none() {
            return Err(LoopError::FdNotRegistered { fd: i64::from(fd) });
        }
        // The kernel-side deregistration is best effort: the fd may already be
        // closed, which deregisters implicitly.
        drop(self.poll.registry().deregister(&mut mio::unix::SourceFd(&fd)));
        self.fd_count.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Current interest of a registered descriptor, mainly for diagnostics/tests.
    #[must_use]
    pub fn interest_of(&self, fd: RawFd) -> Option<FdInterest> {
        self.fd_table.read().unwrap().get(&fd).map(|e| e.interest)
    }

    /// Whether the descriptor still has a registration. Dispatch re-checks this so
    /// a callback that unregistered a later-in-the-batch fd suppresses its stale
    /// dispatch.
    #[must_use]
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.fd_table.read().unwrap().contains_key(&fd)
    }

    /// Blocks (up to `timeout`; `None` = forever, `Some(ZERO)` = non-blocking) and
    /// collects ready descriptors into `ready`.
    ///
    /// `EINTR` returns an empty outcome - the caller simply re-enters on its next
    /// tick. The callback handles are cloned out under the read lock; no user code
    /// runs while any lock is held.
    ///
    /// # Errors
    ///
    /// [`LoopError::PollerClosed`] after close; [`LoopError::Poller`] for fatal
    /// selector failures.
    pub fn poll(
        &mut self,
        timeout: Option<Duration>,
        ready: &mut Vec<ReadyFd>,
    ) -> Result<PollOutcome, LoopError> {
        self.ensure_open()?;
        ready.clear();
        if let Err(error) = self.poll.poll(&mut self.events, timeout) {
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(PollOutcome::default());
            }
            return Err(LoopError::Poller(error));
        }

        let mut outcome = PollOutcome::default();
        let table = self.fd_table.read().unwrap();
        for event in &self.events {
            if event.token() == WAKE_TOKEN {
                // mio owns the drain discipline of the underlying eventfd/pipe.
                outcome.woken = true;
                continue;
            }
            let fd = RawFd::try_from(event.token().0).unwrap_or(-1);
            let Some(entry) = table.get(&fd) else {
                // Raced with an unregister; the kernel event is stale.
                continue;
            };
            ready.push(ReadyFd {
                fd,
                readiness: FdReadiness::from_mio(event),
                callback: Arc::clone(&entry.callback),
            });
        }
        outcome.ready_count = ready.len();
        Ok(outcome)
    }

    /// Interrupts a concurrent or future [`poll()`] from any thread.
    ///
    /// # Errors
    ///
    /// [`LoopError::Poller`] when the underlying write fails non-transiently.
    ///
    /// [`poll()`]: Self::poll
    pub fn wake(&self) -> Result<(), LoopError> {
        self.waker.wake().map_err(LoopError::Poller)
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn registered_count(&self) -> usize { self.fd_count.load(Ordering::SeqCst) }

    /// Unregisters everything and refuses further operations. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut table = self.fd_table.write().unwrap();
        #[cfg(unix)]
        for (&fd, _entry) in table.iter() {
            drop(self.poll.registry().deregister(&mut mio::unix::SourceFd(&fd)));
        }
        table.clear();
        self.fd_count.store(0, Ordering::SeqCst);
        // Dropping `self.poll` later closes the selector fd itself.
    }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed }

    fn ensure_open(&self) -> Result<(), LoopError> {
        if self.closed {
            Err(LoopError::PollerClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_fd_in_range(fd: RawFd) -> Result<(), LoopError> {
        if fd < 0 {
            Err(LoopError::FdOutOfRange { fd: i64::from(fd) })
        } else {
            Ok(())
        }
    }
}
