// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pooled timer nodes and the slab that owns them. See [`TimerNode`] and
//! [`TimerSlab`].

use crate::{core::clock::TickTime, event_loop::LoopCtx, task::LocalTask};
use std::time::Duration;

/// Sentinel for "not currently in the heap".
pub const NOT_IN_HEAP: i32 = -1;

/// How many released node boxes we keep for reuse.
const NODE_POOL_LIMIT: usize = 32;

/// The callback payload of a timer node.
pub enum TimerWork {
    /// Placeholder while the callback is checked out for execution.
    Taken,
    /// One-shot `setTimeout`-style callback.
    Once(LocalTask),
    /// Repeating `setInterval`-style callback with its period.
    Repeating {
        every: Duration,
        callback: Box<dyn FnMut(&mut LoopCtx<'_>) + Send>,
    },
}

impl std::fmt::Debug for TimerWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerWork::Taken => write!(f, "Taken"),
            TimerWork::Once(_) => write!(f, "Once(..)"),
            TimerWork::Repeating { every, .. } => {
                write!(f, "Repeating {{ every: {every:?} }}")
            }
        }
    }
}

/// A single timer: identity, deadline, nesting bookkeeping, heap position, and the
/// callback.
///
/// Nodes live in a [`TimerSlab`] slot; the slot index is stable for the node's whole
/// scheduled life, which is what the heap and the id maps point at. `heap_index` is
/// maintained by the heap's swap operations so removal by id is O(log n).
///
/// At most one heap occurrence at a time: a node is either in the heap
/// (`heap_index ≥ 0`) or checked out for firing (`heap_index == NOT_IN_HEAP`).
#[derive(Debug)]
pub struct TimerNode {
    pub id: u64,
    pub when: TickTime,
    pub nesting_level: u32,
    pub heap_index: i32,
    pub canceled: bool,
    pub work: TimerWork,
}

impl TimerNode {
    /// Resets every field to the pooled-idle values so a recycled node carries
    /// nothing over - a stale callback in a pooled node is a retention leak.
    pub fn clear(&mut self) {
        self.id = 0;
        self.when = TickTime(0);
        self.nesting_level = 0;
        self.heap_index = NOT_IN_HEAP;
        self.canceled = false;
        self.work = TimerWork::Taken;
    }
}

/// Slot-stable storage for [`TimerNode`]s plus a recycling pool.
///
/// Slots hold `None` when free; the free list makes allocation O(1). Released node
/// boxes (field-cleared) go to the pool so steady-state scheduling does not allocate.
#[derive(Debug, Default)]
pub struct TimerSlab {
    slots: Vec<Option<Box<TimerNode>>>,
    free: Vec<u32>,
    pool: Vec<Box<TimerNode>>,
}

impl TimerSlab {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Places a node (recycling a pooled box when available) and returns its slot.
    pub fn insert(
        &mut self,
        id: u64,
        when: TickTime,
        nesting_level: u32,
        work: TimerWork,
    ) -> u32 {
        let mut node = self.pool.pop().unwrap_or_else(|| {
            Box::new(TimerNode {
                id: 0,
                when: TickTime(0),
                nesting_level: 0,
                heap_index: NOT_IN_HEAP,
                canceled: false,
                work: TimerWork::Taken,
            })
        });
        node.id = id;
        node.when = when;
        node.nesting_level = nesting_level;
        node.heap_index = NOT_IN_HEAP;
        node.canceled = false;
        node.work = work;

        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(node);
            slot
        } else {
            self.slots.push(Some(node));
            u32::try_from(self.slots.len() - 1).expect("timer slab exceeds u32 slots")
        }
    }

    #[must_use]
    pub fn get(&self, slot: u32) -> &TimerNode {
        self.slots[slot as usize].as_deref().expect("live timer slot")
    }

    pub fn get_mut(&mut self, slot: u32) -> &mut TimerNode {
        self.slots[slot as usize].as_deref_mut().expect("live timer slot")
    }

    /// Frees the slot and pools the cleared node box.
    pub fn release(&mut self, slot: u32) {
        let mut node = self.slots[slot as usize].take().expect("live timer slot");
        node.clear();
        if self.pool.len() < NODE_POOL_LIMIT {
            self.pool.push(node);
        }
        self.free.push(slot);
    }

    /// Live node count (scheduled + currently firing).
    #[must_use]
    pub fn len(&self) -> usize { self.slots.len() - self.free.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slot_reuse_goes_through_clear() {
        let mut slab = TimerSlab::new();
        let slot = slab.insert(7, TickTime(100), 2, TimerWork::Once(Box::new(|_| {})));
        assert_eq!(slab.get(slot).id, 7);
        slab.release(slot);
        assert!(slab.is_empty());

        // The freed slot is reused, and the recycled node starts from the inserted
        // values, not stale ones.
        let slot2 = slab.insert(9, TickTime(200), 1, TimerWork::Once(Box::new(|_| {})));
        assert_eq!(slot2, slot);
        let node = slab.get(slot2);
        assert_eq!(node.id, 9);
        assert_eq!(node.when, TickTime(200));
        assert_eq!(node.nesting_level, 1);
        assert_eq!(node.heap_index, NOT_IN_HEAP);
        assert!(!node.canceled);
    }

    #[test]
    fn test_release_drops_the_callback() {
        let mut slab = TimerSlab::new();
        let payload = std::sync::Arc::new(());
        let weak = std::sync::Arc::downgrade(&payload);
        let slot = slab.insert(
            1,
            TickTime(0),
            1,
            TimerWork::Once(Box::new(move |_| drop(payload))),
        );
        slab.release(slot);
        assert!(weak.upgrade().is_none(), "pooled node must not retain work");
    }
}
