// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The mutex-guarded MPSC queue of external tasks. See [`IngressQueue`].

use super::IngressChunk;
use crate::{error::LoopError, task::Task};
use std::{collections::VecDeque, sync::Mutex};

/// Default slots per chunk. Overridable via loop options within
/// `[MIN_CHUNK_CAPACITY, MAX_CHUNK_CAPACITY]`, powers of two only.
pub const DEFAULT_CHUNK_CAPACITY: usize = 64;
pub const MIN_CHUNK_CAPACITY: usize = 16;
pub const MAX_CHUNK_CAPACITY: usize = 4_096;

/// How many drained chunks we keep around for reuse. Beyond this, drained chunks are
/// simply dropped.
const POOL_LIMIT: usize = 4;

/// Multi-producer / single-consumer queue of external [`Task`]s.
///
/// Chunks form the head→tail list (front of the deque is the head). Producers append
/// to the tail chunk, allocating from the pool when it fills; the loop pops from the
/// head chunk, recycling fully-drained non-tail chunks back to the pool.
///
/// A single mutex serializes everyone. That is a feature, not a shortcut - see the
/// [module docs](super) for why this mutex is also the memory barrier of the
/// Check-Then-Sleep protocol.
#[derive(Debug)]
pub struct IngressQueue {
    inner: Mutex<IngressInner>,
}

#[derive(Debug)]
struct IngressInner {
    chunks: VecDeque<Box<IngressChunk>>,
    pool: Vec<Box<IngressChunk>>,
    len: usize,
    chunk_capacity: usize,
    closed: bool,
}

impl IngressQueue {
    #[must_use]
    pub fn new(chunk_capacity: usize) -> Self {
        debug_assert!(chunk_capacity.is_power_of_two());
        debug_assert!((MIN_CHUNK_CAPACITY..=MAX_CHUNK_CAPACITY).contains(&chunk_capacity));
        let mut chunks = VecDeque::with_capacity(2);
        chunks.push_back(Box::new(IngressChunk::new(chunk_capacity)));
        Self {
            inner: Mutex::new(IngressInner {
                chunks,
                pool: Vec::new(),
                len: 0,
                chunk_capacity,
                closed: false,
            }),
        }
    }

    /// Appends a task. This is the "Write" half of Write-Then-Check: the caller must
    /// follow up with a loop-state load and (conditionally) a wake.
    ///
    /// # Errors
    ///
    /// [`LoopError::LoopTerminated`] once [`close()`] has run. A push that acquired
    /// the mutex before the close wins the race and will be drained.
    ///
    /// [`close()`]: Self::close
    pub fn push(&self, task: Task) -> Result<(), LoopError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.closed {
            return Err(LoopError::LoopTerminated);
        }
        let task = match inner.chunks.back_mut().unwrap().push(task) {
            Ok(()) => {
                inner.len += 1;
                return Ok(());
            }
            Err(task) => task,
        };
        // Tail chunk is full; link a fresh (or pooled) one.
        let mut chunk = inner
            .pool
            .pop()
            .unwrap_or_else(|| Box::new(IngressChunk::new(inner.chunk_capacity)));
        chunk.push(task).ok().unwrap();
        inner.chunks.push_back(chunk);
        inner.len += 1;
        Ok(())
    }

    /// Removes the next task. Loop thread only.
    ///
    /// The popped slot is cleared inside the chunk; a fully-drained head chunk that
    /// is not the tail goes back to the pool with every slot reset.
    pub fn pop(&self) -> Option<Task> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        loop {
            {
                let head = inner.chunks.front_mut()?;
                if let Some(task) = head.pop() {
                    inner.len -= 1;
                    return Some(task);
                }
            }
            let head_exhausted =
                inner.chunks.front().is_some_and(|chunk| chunk.is_exhausted());
            if head_exhausted && inner.chunks.len() > 1 {
                let mut drained = inner.chunks.pop_front().unwrap();
                if inner.pool.len() < POOL_LIMIT {
                    drained.reset();
                    inner.pool.push(drained);
                }
                continue;
            }
            if head_exhausted {
                // Sole chunk, fully cycled: rewind in place so pushes can resume.
                inner.chunks.front_mut().unwrap().reset();
            }
            return None;
        }
    }

    /// Exact queue length. Acquiring the mutex here is the loop's StoreLoad barrier
    /// in Check-Then-Sleep.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.lock().unwrap().len }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Refuses all future pushes. Tasks already enqueued remain poppable so the
    /// graceful drain can run them. Idempotent.
    pub fn close(&self) { self.inner.lock().unwrap().closed = true; }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.lock().unwrap().closed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::LoopCtx;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn noop_task() -> Task { Box::new(|_ctx: &mut LoopCtx<'_>| {}) }

    #[test]
    fn test_len_is_exact_across_chunk_boundaries() {
        let queue = IngressQueue::new(16);
        for _ in 0..40 {
            queue.push(noop_task()).unwrap();
        }
        assert_eq!(queue.len(), 40);
        for expected_remaining in (0..40).rev() {
            assert!(queue.pop().is_some());
            assert_eq!(queue.len(), expected_remaining);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drained_chunks_recycle_and_retain_nothing() {
        let queue = IngressQueue::new(16);
        let payload = Arc::new(());
        let weak = Arc::downgrade(&payload);

        // Two chunks worth of tasks, one of which captures the payload.
        {
            let payload = Arc::clone(&payload);
            queue
                .push(Box::new(move |_ctx| drop(payload)))
                .unwrap();
        }
        for _ in 0..31 {
            queue.push(noop_task()).unwrap();
        }
        drop(payload);

        while let Some(task) = queue.pop() {
            drop(task);
        }
        assert!(
            weak.upgrade().is_none(),
            "no slot may retain a popped task's captures"
        );

        // The queue stays usable: pooled chunks rewind correctly.
        for _ in 0..40 {
            queue.push(noop_task()).unwrap();
        }
        assert_eq!(queue.len(), 40);
    }

    #[test]
    fn test_close_rejects_new_pushes_but_drains_existing() {
        let queue = IngressQueue::new(16);
        queue.push(noop_task()).unwrap();
        queue.close();
        assert!(matches!(
            queue.push(noop_task()),
            Err(LoopError::LoopTerminated)
        ));
        assert!(queue.pop().is_some(), "pre-close work still drains");
        assert!(queue.pop().is_none());
        // Idempotent.
        queue.close();
    }

    #[test]
    fn test_concurrent_producers_lose_no_tasks() {
        let queue = Arc::new(IngressQueue::new(16));
        let producer_count = 8;
        let per_producer = 500;

        let handles: Vec<_> = (0..producer_count)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..per_producer {
                        queue.push(Box::new(|_ctx: &mut LoopCtx<'_>| {})).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), producer_count * per_producer);
        let mut drained = 0;
        while queue.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, producer_count * per_producer);
    }
}
