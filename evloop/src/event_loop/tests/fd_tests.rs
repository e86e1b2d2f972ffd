// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! FD registration and dispatch through a real pipe, on a really-running loop.

use serial_test::serial;
use crate::{event_loop::{EventLoop, EventLoopOptions, LoopEvent},
            poller::FdInterest};
use pretty_assertions::assert_eq;
use std::{io::Write,
          os::fd::AsRawFd,
          sync::{Arc,
                 atomic::{AtomicUsize, Ordering}},
          time::{Duration, Instant}};

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let give_up_at = Instant::now() + deadline;
    while !condition() {
        assert!(Instant::now() < give_up_at, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
#[serial]
fn test_pipe_readiness_dispatches_callback_on_loop_thread() {
    let (event_loop, handle) = EventLoop::new(EventLoopOptions::default());
    let mut events = handle.subscribe();
    let loop_thread = std::thread::spawn(move || event_loop.run());
    assert_eq!(events.blocking_recv().unwrap(), LoopEvent::Started);

    let (mut pipe_tx, pipe_rx) = mio::unix::pipe::new().unwrap();
    let fd = pipe_rx.as_raw_fd();
    let dispatches = Arc::new(AtomicUsize::new(0));
    let loop_thread_id = Arc::new(std::sync::Mutex::new(None));

    let dispatches_in_cb = dispatches.clone();
    let thread_id_in_cb = loop_thread_id.clone();
    handle
        .submit(Box::new(move |ctx| {
            // Keep the receiver alive inside the loop so the fd stays valid.
            let pipe_rx = pipe_rx;
            ctx.register_fd(
                fd,
                FdInterest::Read,
                Box::new(move |_ctx, readiness| {
                    let _keep_alive = &pipe_rx;
                    assert!(readiness.readable);
                    *thread_id_in_cb.lock().unwrap() =
                        Some(std::thread::current().id());
                    dispatches_in_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }))
        .unwrap();

    // Trigger readiness from outside.
    wait_until(Duration::from_secs(5), || {
        pipe_tx.write_all(&[1]).is_ok()
    });
    wait_until(Duration::from_secs(10), || {
        dispatches.load(Ordering::SeqCst) >= 1
    });

    // The callback ran on the loop thread, not this one.
    let seen = loop_thread_id.lock().unwrap().unwrap();
    assert_ne!(seen, std::thread::current().id());

    handle.shutdown();
    loop_thread.join().unwrap().unwrap();
}

#[test]
#[serial]
fn test_unregister_stops_dispatch_and_register_errors_are_precise() {
    let (event_loop, handle) = EventLoop::new(EventLoopOptions::default());
    let mut events = handle.subscribe();
    let loop_thread = std::thread::spawn(move || event_loop.run());
    assert_eq!(events.blocking_recv().unwrap(), LoopEvent::Started);

    let (mut pipe_tx, pipe_rx) = mio::unix::pipe::new().unwrap();
    let fd = pipe_rx.as_raw_fd();
    let dispatches = Arc::new(AtomicUsize::new(0));
    let (outcome_tx, outcome_rx) = std::sync::mpsc::channel();

    let dispatches_in_cb = dispatches.clone();
    handle
        .submit(Box::new(move |ctx| {
            let pipe_rx = pipe_rx;
            ctx.register_fd(
                fd,
                FdInterest::Read,
                Box::new(move |_ctx, _readiness| {
                    let _keep_alive = &pipe_rx;
                    dispatches_in_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
            // Double registration is a precise caller error.
            let second = ctx.register_fd(fd, FdInterest::Read, Box::new(|_, _| {}));
            let unregister_unknown = ctx.unregister_fd(fd + 1_000);
            ctx.unregister_fd(fd).unwrap();
            outcome_tx
                .send((second.is_err(), unregister_unknown.is_err()))
                .unwrap();
        }))
        .unwrap();

    let (double_register_failed, unknown_unregister_failed) =
        outcome_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(double_register_failed);
    assert!(unknown_unregister_failed);

    // Writes after unregistration never dispatch.
    drop(pipe_tx.write_all(&[1]));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(dispatches.load(Ordering::SeqCst), 0);

    handle.shutdown();
    loop_thread.join().unwrap().unwrap();
}
