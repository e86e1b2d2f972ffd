// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words setImmediate

//! The `setImmediate`-style FIFO: run-once callbacks that fire after the timer phase
//! of the tick they were scheduled before. See [`ImmediateQueue`].

use crate::{error::LoopError, task::LocalTask};
use std::collections::VecDeque;

/// FIFO of immediates with their ids. Loop thread only.
///
/// The per-tick phase runs only the entries present when the phase starts; an
/// immediate scheduled *by* an immediate runs on the next tick. That keeps a
/// self-rescheduling immediate from starving timers and I/O.
pub struct ImmediateQueue {
    entries: VecDeque<(u64, LocalTask)>,
}

impl std::fmt::Debug for ImmediateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmediateQueue")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl Default for ImmediateQueue {
    fn default() -> Self { Self::new() }
}

impl ImmediateQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends an immediate under a caller-allocated id.
    pub fn schedule(&mut self, id: u64, task: LocalTask) {
        self.entries.push_back((id, task));
    }

    /// Removes a pending immediate by id.
    ///
    /// # Errors
    ///
    /// [`LoopError::TimerNotFound`] when the id is not pending (already ran, already
    /// canceled, or never issued).
    pub fn cancel(&mut self, id: u64) -> Result<(), LoopError> {
        match self.entries.iter().position(|(entry_id, _)| *entry_id == id) {
            Some(index) => {
                drop(self.entries.remove(index));
                Ok(())
            }
            None => Err(LoopError::TimerNotFound { id }),
        }
    }

    /// Takes everything queued so far, leaving the queue ready to collect the next
    /// tick's entries.
    #[must_use]
    pub fn take_phase_batch(&mut self) -> VecDeque<(u64, LocalTask)> {
        std::mem::take(&mut self.entries)
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Drops everything. Shutdown path.
    pub fn clear(&mut self) { self.entries.clear(); }
}
