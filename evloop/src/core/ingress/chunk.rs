// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A fixed-capacity run of task slots. See [`IngressChunk`].

use crate::task::Task;

/// One fixed-capacity segment of the ingress queue.
///
/// Slots in `[read_pos, write_pos)` hold tasks; everything else is `None`. The
/// positions only move forward within one fill/drain cycle:
///
/// ```text
/// 0 ≤ read_pos ≤ write_pos ≤ capacity
/// ```
///
/// A chunk is *exhausted* once `read_pos == write_pos == capacity` - it can never
/// accept another push and is ready to be recycled. [`reset()`] clears every slot
/// (releasing captured closures) and rewinds both positions, making the chunk
/// indistinguishable from a fresh allocation.
///
/// [`reset()`]: Self::reset
pub struct IngressChunk {
    slots: Box<[Option<Task>]>,
    read_pos: usize,
    write_pos: usize,
}

impl std::fmt::Debug for IngressChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressChunk")
            .field("capacity", &self.slots.len())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

impl IngressChunk {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Appends a task. Returns it back to the caller when the chunk is full.
    ///
    /// # Errors
    ///
    /// The rejected task, so the caller can place it in a fresh chunk.
    pub fn push(&mut self, task: Task) -> Result<(), Task> {
        if self.write_pos == self.slots.len() {
            return Err(task);
        }
        self.slots[self.write_pos] = Some(task);
        self.write_pos += 1;
        Ok(())
    }

    /// Removes the next task, clearing its slot so the closure (and everything it
    /// captured) is released as soon as the caller drops or runs it.
    pub fn pop(&mut self) -> Option<Task> {
        if self.read_pos == self.write_pos {
            return None;
        }
        let task = self.slots[self.read_pos].take();
        self.read_pos += 1;
        task
    }

    /// Unread task count.
    #[must_use]
    pub fn len(&self) -> usize { self.write_pos - self.read_pos }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Whether every slot has been written and read. Such a chunk is recyclable.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.read_pos == self.slots.len() && self.write_pos == self.slots.len()
    }

    /// Clears all slots and rewinds positions. A returned chunk with a stale task in
    /// a slot is a retention leak, so this touches every slot, not just the window.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.read_pos = 0;
        self.write_pos = 0;
    }

    #[must_use]
    pub fn capacity(&self) -> usize { self.slots.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::LoopCtx;
    use std::sync::Arc;

    fn noop_task() -> Task { Box::new(|_ctx: &mut LoopCtx<'_>| {}) }

    #[test]
    fn test_push_pop_fifo_within_chunk() {
        let mut chunk = IngressChunk::new(16);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            chunk
                .push(Box::new(move |_ctx| order.lock().unwrap().push(i)))
                .ok()
                .unwrap();
        }
        assert_eq!(chunk.len(), 3);
        // Tasks come back in submit order (we drop them here instead of running
        // them; FIFO is observable through slot positions).
        for _ in 0..3 {
            assert!(chunk.pop().is_some());
        }
        assert!(chunk.pop().is_none());
    }

    #[test]
    fn test_full_chunk_rejects_and_returns_task() {
        let mut chunk = IngressChunk::new(16);
        for _ in 0..16 {
            chunk.push(noop_task()).ok().unwrap();
        }
        assert!(chunk.push(noop_task()).is_err());
    }

    #[test]
    fn test_pop_clears_slot_for_release() {
        let mut chunk = IngressChunk::new(16);
        let payload = Arc::new(());
        let weak = Arc::downgrade(&payload);
        chunk
            .push(Box::new(move |_ctx| drop(payload)))
            .ok()
            .unwrap();
        let task = chunk.pop().unwrap();
        drop(task);
        // The chunk slot holds no second reference; dropping the popped task was the
        // last release.
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_exhausted_then_reset_is_fresh() {
        let mut chunk = IngressChunk::new(16);
        for _ in 0..16 {
            chunk.push(noop_task()).ok().unwrap();
        }
        while chunk.pop().is_some() {}
        assert!(chunk.is_exhausted());

        chunk.reset();
        assert!(!chunk.is_exhausted());
        assert_eq!(chunk.len(), 0);
        chunk.push(noop_task()).ok().unwrap();
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn test_reset_releases_unread_tasks() {
        let mut chunk = IngressChunk::new(16);
        let payload = Arc::new(());
        let weak = Arc::downgrade(&payload);
        chunk
            .push(Box::new(move |_ctx| drop(payload)))
            .ok()
            .unwrap();
        chunk.reset();
        assert!(weak.upgrade().is_none(), "reset must clear captured state");
    }
}
