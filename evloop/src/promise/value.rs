// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Engine-agnostic promise values and the built-in reason types.

use std::{any::Any, sync::Arc};

/// A settled value or rejection reason. Shared (every reaction on a promise sees the
/// same settlement), type-erased, and cross-thread safe.
pub type PromiseValue = Arc<dyn Any + Send + Sync>;

/// Wraps an arbitrary value for settlement.
#[must_use]
pub fn promise_value<T: Send + Sync + 'static>(value: T) -> PromiseValue {
    Arc::new(value)
}

/// Downcast helper for reading a settlement back out.
#[must_use]
pub fn value_as<T: 'static>(value: &PromiseValue) -> Option<&T> {
    value.downcast_ref::<T>()
}

/// Rejection reason of `any()` when every input rejected: all the individual
/// reasons, in input order.
pub struct AggregateError {
    pub reasons: Vec<PromiseValue>,
}

impl std::fmt::Debug for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AggregateError({} reasons)", self.reasons.len())
    }
}

/// Rejection reason synthesized from a panicking reaction or promisified task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicReason {
    pub message: String,
}

/// Distinguished rejection reason for a promisified job whose producer aborted
/// before settling - its resolver and rejecter were dropped while the promise was
/// still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAborted;

/// Rejection reason applied to every still-pending promise during loop shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopShuttingDown;

/// Per-input outcome reported by `all_settled()`. Never a rejection at the
/// combinator level.
#[derive(Clone)]
pub enum SettledResult {
    Fulfilled(PromiseValue),
    Rejected(PromiseValue),
}

impl std::fmt::Debug for SettledResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettledResult::Fulfilled(_) => write!(f, "Fulfilled(..)"),
            SettledResult::Rejected(_) => write!(f, "Rejected(..)"),
        }
    }
}
