// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words combinator combinators

//! `all` / `race` / `any` / `all_settled` over slices of promises.
//!
//! Each combinator mints a result promise and attaches an internal watcher to every
//! input. Watchers share a small mutex-guarded accumulator; the first watcher to
//! complete the combinator's condition settles the result (later settlements no-op
//! at the promise layer, but the `done` flag also keeps the accumulator from
//! touching freed slots).
//!
//! Empty inputs follow ECMA-262: `all` and `all_settled` fulfill with an empty
//! vector, `any` rejects with an empty [`AggregateError`], `race` stays pending
//! forever.

use super::{AggregateError, PromiseHandle, PromiseValue, Reaction, SettledResult,
            attach, machine::settle_direct, promise_value};
use crate::{error::LoopError, event_loop::LoopCtx};
use std::sync::{Arc, Mutex};

struct GatherState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    done: bool,
}

impl<T> GatherState<T> {
    fn new(len: usize) -> Arc<Mutex<Self>> {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Arc::new(Mutex::new(Self {
            slots,
            remaining: len,
            done: false,
        }))
    }
}

/// Fulfills with every input's value in input order; rejects with the first
/// rejection.
///
/// # Errors
///
/// [`LoopError::PromiseIdExhausted`] when no id is left for the result promise.
pub fn all(
    ctx: &mut LoopCtx<'_>,
    inputs: &[PromiseHandle],
) -> Result<PromiseHandle, LoopError> {
    let result = ctx.mint_promise()?;
    if inputs.is_empty() {
        settle_direct(
            ctx,
            &result.promise,
            Ok(promise_value(Vec::<PromiseValue>::new())),
        );
        return Ok(result);
    }

    let state = GatherState::<PromiseValue>::new(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let state = Arc::clone(&state);
        let target = Arc::clone(&result.promise);
        attach(
            ctx,
            &input.promise,
            Reaction::Watch {
                watch: Box::new(move |ctx, settlement| {
                    let mut gather = state.lock().unwrap();
                    if gather.done {
                        return;
                    }
                    match settlement {
                        Ok(value) => {
                            gather.slots[index] = Some(value);
                            gather.remaining -= 1;
                            if gather.remaining == 0 {
                                gather.done = true;
                                let values: Vec<PromiseValue> = gather
                                    .slots
                                    .drain(..)
                                    .map(|slot| slot.expect("all slots filled"))
                                    .collect();
                                drop(gather);
                                settle_direct(ctx, &target, Ok(promise_value(values)));
                            }
                        }
                        Err(reason) => {
                            gather.done = true;
                            drop(gather);
                            settle_direct(ctx, &target, Err(reason));
                        }
                    }
                }),
            },
        );
    }
    Ok(result)
}

/// Settles with the first settlement, whichever way it went.
///
/// # Errors
///
/// [`LoopError::PromiseIdExhausted`] when no id is left for the result promise.
pub fn race(
    ctx: &mut LoopCtx<'_>,
    inputs: &[PromiseHandle],
) -> Result<PromiseHandle, LoopError> {
    let result = ctx.mint_promise()?;
    for input in inputs {
        let target = Arc::clone(&result.promise);
        attach(
            ctx,
            &input.promise,
            Reaction::Watch {
                watch: Box::new(move |ctx, settlement| {
                    // First settlement wins; settle_direct no-ops afterwards.
                    settle_direct(ctx, &target, settlement);
                }),
            },
        );
    }
    Ok(result)
}

/// Fulfills with the first fulfillment; rejects with [`AggregateError`] only when
/// every input rejected.
///
/// # Errors
///
/// [`LoopError::PromiseIdExhausted`] when no id is left for the result promise.
pub fn any(
    ctx: &mut LoopCtx<'_>,
    inputs: &[PromiseHandle],
) -> Result<PromiseHandle, LoopError> {
    let result = ctx.mint_promise()?;
    if inputs.is_empty() {
        settle_direct(
            ctx,
            &result.promise,
            Err(promise_value(AggregateError { reasons: vec![] })),
        );
        return Ok(result);
    }

    let state = GatherState::<PromiseValue>::new(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let state = Arc::clone(&state);
        let target = Arc::clone(&result.promise);
        attach(
            ctx,
            &input.promise,
            Reaction::Watch {
                watch: Box::new(move |ctx, settlement| {
                    let mut gather = state.lock().unwrap();
                    if gather.done {
                        return;
                    }
                    match settlement {
                        Ok(value) => {
                            gather.done = true;
                            drop(gather);
                            settle_direct(ctx, &target, Ok(value));
                        }
                        Err(reason) => {
                            gather.slots[index] = Some(reason);
                            gather.remaining -= 1;
                            if gather.remaining == 0 {
                                gather.done = true;
                                let reasons: Vec<PromiseValue> = gather
                                    .slots
                                    .drain(..)
                                    .map(|slot| slot.expect("all slots filled"))
                                    .collect();
                                drop(gather);
                                settle_direct(
                                    ctx,
                                    &target,
                                    Err(promise_value(AggregateError { reasons })),
                                );
                            }
                        }
                    }
                }),
            },
        );
    }
    Ok(result)
}

/// Never rejects: fulfills with one [`SettledResult`] per input, in input order,
/// once every input has settled.
///
/// # Errors
///
/// [`LoopError::PromiseIdExhausted`] when no id is left for the result promise.
pub fn all_settled(
    ctx: &mut LoopCtx<'_>,
    inputs: &[PromiseHandle],
) -> Result<PromiseHandle, LoopError> {
    let result = ctx.mint_promise()?;
    if inputs.is_empty() {
        settle_direct(
            ctx,
            &result.promise,
            Ok(promise_value(Vec::<SettledResult>::new())),
        );
        return Ok(result);
    }

    let state = GatherState::<SettledResult>::new(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let state = Arc::clone(&state);
        let target = Arc::clone(&result.promise);
        attach(
            ctx,
            &input.promise,
            Reaction::Watch {
                watch: Box::new(move |ctx, settlement| {
                    let mut gather = state.lock().unwrap();
                    if gather.done {
                        return;
                    }
                    gather.slots[index] = Some(match settlement {
                        Ok(value) => SettledResult::Fulfilled(value),
                        Err(reason) => SettledResult::Rejected(reason),
                    });
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        gather.done = true;
                        let results: Vec<SettledResult> = gather
                            .slots
                            .drain(..)
                            .map(|slot| slot.expect("all slots filled"))
                            .collect();
                        drop(gather);
                        settle_direct(ctx, &target, Ok(promise_value(results)));
                    }
                }),
            },
        );
    }
    Ok(result)
}
