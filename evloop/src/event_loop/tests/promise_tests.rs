// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words combinators microtask

//! Promise machine semantics driven through real ticks.

use super::{order_log, pump, record, recorded, started_loop};
use crate::{event_loop::EventLoopOptions,
            promise::{AggregateError, PanicReason, PromiseStateKind, PromiseValue,
                      SettledResult, TaskAborted, promise_value, value_as}};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex,
                atomic::{AtomicI64, Ordering}};

#[test]
fn test_then_is_asynchronous_even_on_settled_promise() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&promise, promise_value(1_i64));
            let then_log = setup_log.clone();
            promise
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, _value| {
                        record(&then_log, "reaction");
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
            // The reaction must not have run synchronously inside then().
            record(&setup_log, "after-then");
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["after-then", "reaction"]);
}

#[test]
fn test_chain_accumulates_value_to_14() {
    // resolve(1) → +1 → ×2 → +10 ⇒ 14, across microtask ticks.
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let final_value = Arc::new(AtomicI64::new(0));

    let observed = final_value.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&promise, promise_value(1_i64));

            let step1 = promise
                .then(
                    ctx,
                    Some(Box::new(|_ctx, value| {
                        promise_value(value_as::<i64>(&value).unwrap() + 1)
                    })),
                    None,
                )
                .unwrap();
            let step2 = step1
                .then(
                    ctx,
                    Some(Box::new(|_ctx, value| {
                        promise_value(value_as::<i64>(&value).unwrap() * 2)
                    })),
                    None,
                )
                .unwrap();
            let observed = observed.clone();
            step2
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        let result = value_as::<i64>(&value).unwrap() + 10;
                        observed.store(result, Ordering::SeqCst);
                        promise_value(result)
                    })),
                    None,
                )
                .unwrap();
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(final_value.load(Ordering::SeqCst), 14);
}

#[test]
fn test_rejection_skips_fulfillment_handlers_until_catch() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.reject_promise(&promise, promise_value("boom"));

            let skipped_log = setup_log.clone();
            let caught_log = setup_log.clone();
            let chained = promise
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, _value| {
                        record(&skipped_log, "skipped");
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
            chained
                .catch(
                    ctx,
                    Box::new(move |_ctx, reason| {
                        assert_eq!(value_as::<&str>(&reason), Some(&"boom"));
                        record(&caught_log, "caught");
                        promise_value("recovered")
                    }),
                )
                .unwrap();
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["caught"]);
}

#[test]
fn test_finally_passes_settlement_through() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&promise, promise_value(5_i64));

            let finally_log = setup_log.clone();
            let after_log = setup_log.clone();
            let after_finally = promise
                .finally(ctx, Box::new(move |_ctx| record(&finally_log, "finally")))
                .unwrap();
            after_finally
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        // finally() must not consume or replace the value.
                        assert_eq!(value_as::<i64>(&value), Some(&5));
                        record(&after_log, "value-intact");
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["finally", "value-intact"]);
}

#[test]
fn test_panicking_reaction_rejects_derived_child() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&promise, promise_value(()));

            let caught_log = setup_log.clone();
            let child = promise
                .then(
                    ctx,
                    Some(Box::new(|_ctx, _value| -> PromiseValue {
                        panic!("reaction exploded")
                    })),
                    None,
                )
                .unwrap();
            child
                .catch(
                    ctx,
                    Box::new(move |_ctx, reason| {
                        let panic_reason = value_as::<PanicReason>(&reason).unwrap();
                        assert_eq!(panic_reason.message, "reaction exploded");
                        record(&caught_log, "caught-panic");
                        promise_value(())
                    }),
                )
                .unwrap();
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["caught-panic"]);
}

#[test]
fn test_reaction_returning_promise_is_adopted() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let observed = Arc::new(AtomicI64::new(0));

    let observed_in_task = observed.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (outer, _r1, _j1) = ctx.new_promise().unwrap();
            let (inner, _r2, _j2) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&outer, promise_value(()));

            let observed = observed_in_task.clone();
            let chained = outer
                .then(
                    ctx,
                    Some(Box::new({
                        let inner = inner.clone();
                        move |_ctx, _value| promise_value(inner)
                    })),
                    None,
                )
                .unwrap();
            chained
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        observed.store(*value_as::<i64>(&value).unwrap(), Ordering::SeqCst);
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();

            // Settle the inner promise later in the same tick; the chained child
            // must adopt it.
            let inner_to_settle = inner;
            ctx.schedule_microtask(Box::new(move |ctx| {
                ctx.resolve_promise(&inner_to_settle, promise_value(42_i64));
            }));
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(observed.load(Ordering::SeqCst), 42);
}

#[test]
fn test_settlement_is_exactly_once() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let observed = Arc::new(Mutex::new(Vec::new()));

    let observed_in_task = observed.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, _resolver, _rejecter) = ctx.new_promise().unwrap();
            ctx.resolve_promise(&promise, promise_value(1_i64));
            ctx.resolve_promise(&promise, promise_value(2_i64));
            ctx.reject_promise(&promise, promise_value("late"));

            let observed = observed_in_task.clone();
            promise
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        observed.lock().unwrap().push(*value_as::<i64>(&value).unwrap());
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(*observed.lock().unwrap(), vec![1]);
}

#[test]
fn test_off_thread_resolver_settles_through_inbox() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let observed = Arc::new(AtomicI64::new(0));

    let (sender, receiver) = std::sync::mpsc::channel();
    let observed_in_task = observed.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, resolver, _rejecter) = ctx.new_promise().unwrap();
            let observed = observed_in_task.clone();
            promise
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        observed.store(*value_as::<i64>(&value).unwrap(), Ordering::SeqCst);
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
            sender.send(resolver).unwrap();
        }))
        .unwrap();
    pump(&mut event_loop);

    // Resolve from a different thread entirely.
    let resolver = receiver.recv().unwrap();
    std::thread::spawn(move || resolver.resolve(promise_value(99_i64)))
        .join()
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(observed.load(Ordering::SeqCst), 99);
}

#[test]
fn test_dropping_settlers_rejects_with_task_aborted() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (promise, resolver, rejecter) = ctx.new_promise().unwrap();
            let caught_log = setup_log.clone();
            promise
                .catch(
                    ctx,
                    Box::new(move |_ctx, reason| {
                        assert!(value_as::<TaskAborted>(&reason).is_some());
                        record(&caught_log, "aborted");
                        promise_value(())
                    }),
                )
                .unwrap();
            // Simulates a producer dying before settling.
            drop(resolver);
            drop(rejecter);
        }))
        .unwrap();

    pump(&mut event_loop);
    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["aborted"]);
}

#[test]
fn test_all_collects_in_order_and_rejects_on_first_failure() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let collected = Arc::new(Mutex::new(Vec::new()));
    let rejected = order_log();

    let collected_in_task = collected.clone();
    let rejected_in_task = rejected.clone();
    handle
        .submit(Box::new(move |ctx| {
            // Happy path: three inputs settled out of order still collect in
            // input order.
            let promises: Vec<_> = (0..3)
                .map(|_| ctx.new_promise().unwrap())
                .collect();
            let handles: Vec<_> = promises.iter().map(|(p, _, _)| p.clone()).collect();
            let all = ctx.promise_all(&handles).unwrap();
            let collected = collected_in_task.clone();
            all.then(
                ctx,
                Some(Box::new(move |_ctx, value| {
                    let values = value_as::<Vec<PromiseValue>>(&value).unwrap();
                    let as_ints: Vec<i64> = values
                        .iter()
                        .map(|v| *value_as::<i64>(v).unwrap())
                        .collect();
                    *collected.lock().unwrap() = as_ints;
                    promise_value(())
                })),
                None,
            )
            .unwrap();
            ctx.resolve_promise(&handles[2], promise_value(30_i64));
            ctx.resolve_promise(&handles[0], promise_value(10_i64));
            ctx.resolve_promise(&handles[1], promise_value(20_i64));

            // Failure path: the first rejection wins.
            let more: Vec<_> = (0..2).map(|_| ctx.new_promise().unwrap()).collect();
            let more_handles: Vec<_> = more.iter().map(|(p, _, _)| p.clone()).collect();
            let all_failing = ctx.promise_all(&more_handles).unwrap();
            let rejected = rejected_in_task.clone();
            all_failing
                .catch(
                    ctx,
                    Box::new(move |_ctx, reason| {
                        assert_eq!(value_as::<&str>(&reason), Some(&"first"));
                        record(&rejected, "rejected");
                        promise_value(())
                    }),
                )
                .unwrap();
            ctx.reject_promise(&more_handles[1], promise_value("first"));
            ctx.resolve_promise(&more_handles[0], promise_value(0_i64));
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(*collected.lock().unwrap(), vec![10, 20, 30]);
    assert_eq!(recorded(&rejected), vec!["rejected"]);
}

#[test]
fn test_race_takes_first_settlement() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let observed = Arc::new(AtomicI64::new(0));

    let observed_in_task = observed.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (first, _r1, _j1) = ctx.new_promise().unwrap();
            let (second, _r2, _j2) = ctx.new_promise().unwrap();
            let winner = ctx.promise_race(&[first.clone(), second.clone()]).unwrap();
            let observed = observed_in_task.clone();
            winner
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        observed.store(*value_as::<i64>(&value).unwrap(), Ordering::SeqCst);
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
            ctx.resolve_promise(&second, promise_value(2_i64));
            ctx.resolve_promise(&first, promise_value(1_i64));
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(observed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_any_rejects_with_aggregate_only_when_all_reject() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (first, _r1, _j1) = ctx.new_promise().unwrap();
            let (second, _r2, _j2) = ctx.new_promise().unwrap();
            let any = ctx.promise_any(&[first.clone(), second.clone()]).unwrap();
            let aggregate_log = setup_log.clone();
            any.catch(
                ctx,
                Box::new(move |_ctx, reason| {
                    let aggregate = value_as::<AggregateError>(&reason).unwrap();
                    assert_eq!(aggregate.reasons.len(), 2);
                    record(&aggregate_log, "aggregate");
                    promise_value(())
                }),
            )
            .unwrap();
            ctx.reject_promise(&first, promise_value("a"));
            ctx.reject_promise(&second, promise_value("b"));
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["aggregate"]);
}

#[test]
fn test_all_settled_never_rejects() {
    let (mut event_loop, handle) = started_loop(EventLoopOptions::default());
    let log = order_log();

    let setup_log = log.clone();
    handle
        .submit(Box::new(move |ctx| {
            let (ok, _r1, _j1) = ctx.new_promise().unwrap();
            let (bad, _r2, _j2) = ctx.new_promise().unwrap();
            let settled = ctx
                .promise_all_settled(&[ok.clone(), bad.clone()])
                .unwrap();
            let results_log = setup_log.clone();
            settled
                .then(
                    ctx,
                    Some(Box::new(move |_ctx, value| {
                        let results = value_as::<Vec<SettledResult>>(&value).unwrap();
                        assert!(matches!(results[0], SettledResult::Fulfilled(_)));
                        assert!(matches!(results[1], SettledResult::Rejected(_)));
                        record(&results_log, "settled");
                        promise_value(())
                    })),
                    None,
                )
                .unwrap();
            ctx.resolve_promise(&ok, promise_value(1_i64));
            ctx.reject_promise(&bad, promise_value("nope"));
        }))
        .unwrap();

    pump(&mut event_loop);
    assert_eq!(recorded(&log), vec!["settled"]);
}

#[test]
fn test_scavenger_reclaims_dropped_promises_during_ticks() {
    let options = EventLoopOptions {
        scavenge_batch: 128,
        ..Default::default()
    };
    let (mut event_loop, handle) = started_loop(options);
    let kept = Arc::new(Mutex::new(Vec::new()));

    let kept_in_task = kept.clone();
    handle
        .submit(Box::new(move |ctx| {
            for i in 0..1_000 {
                let (promise, resolver, _rejecter) = ctx.new_promise().unwrap();
                if i % 100 == 0 {
                    // Keep the resolver too - dropping both settlers unsettled
                    // would reject the promise with TaskAborted by design.
                    kept_in_task.lock().unwrap().push((promise, resolver));
                }
                // The other 99% drop here: strong count goes to zero.
            }
        }))
        .unwrap();

    // Enough ticks for the scavenger to complete a sweep.
    for _ in 0..20 {
        pump(&mut event_loop);
    }
    assert_eq!(event_loop.shared.promises.live_len(), 10);
    for (promise, _resolver) in kept.lock().unwrap().iter() {
        assert_eq!(promise.state(), PromiseStateKind::Pending);
    }
}
