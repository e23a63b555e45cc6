// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

fn pipe() -> (OwnedFd, OwnedFd) {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).unwrap()
}

#[test]
fn queued_callbacks_run_in_fifo_order() {
    let mut reactor = Reactor::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    for i in 0..3 {
        let order = Rc::clone(&order);
        reactor.handle().queue(move || order.borrow_mut().push(i));
    }
    reactor.run().unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn strong_timer_fires_no_earlier_than_its_delay() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&fired);
    let start = Instant::now();
    reactor
        .handle()
        .schedule(move || *flag.borrow_mut() = true, Duration::from_millis(50), false);
    reactor.run().unwrap();
    assert!(*fired.borrow());
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn cancelled_timer_never_fires() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let fired = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&fired);
    let timer = handle.schedule(move || *flag.borrow_mut() = true, Duration::from_millis(10), false);
    handle.cancel(timer).unwrap();
    // Keep the loop alive past the cancelled deadline.
    handle.schedule(|| {}, Duration::from_millis(30), false);
    reactor.run().unwrap();
    assert!(!*fired.borrow());
}

#[test]
fn weak_timer_does_not_keep_the_loop_alive() {
    let mut reactor = Reactor::new().unwrap();
    let fired = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&fired);
    let start = Instant::now();
    reactor
        .handle()
        .schedule(move || *flag.borrow_mut() = true, Duration::from_secs(10), true);
    reactor.run().unwrap();
    assert!(!*fired.borrow());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn timer_cannot_cancel_itself() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let slot: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));
    let result: Rc<RefCell<Option<ReactorError>>> = Rc::new(RefCell::new(None));

    let slot_in_cb = Rc::clone(&slot);
    let result_in_cb = Rc::clone(&result);
    let cb_handle = handle.clone();
    let timer = handle.schedule(
        move || {
            let own = slot_in_cb.borrow().expect("handle stored before run");
            *result_in_cb.borrow_mut() = cb_handle.cancel(own).err();
        },
        Duration::from_millis(5),
        false,
    );
    *slot.borrow_mut() = Some(timer);

    reactor.run().unwrap();
    assert!(matches!(
        result.borrow().as_ref(),
        Some(ReactorError::TimerSelfCancel)
    ));
}

#[test]
fn duplicate_fd_registration_fails() {
    let mut reactor = Reactor::new().unwrap();
    let (r, _w) = pipe();
    let fd = r.as_raw_fd();
    reactor.handle().add(fd, |_| {}).unwrap();
    assert!(matches!(
        reactor.handle().add(fd, |_| {}),
        Err(ReactorError::FdExists(_))
    ));
    reactor.handle().remove(fd, false);
    // Removal is idempotent
    reactor.handle().remove(fd, false);
}

#[test]
fn pipe_data_reaches_the_read_handler() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let (r, w) = pipe();
    let rfd = r.as_raw_fd();
    std::mem::forget(r); // the reactor closes it via remove()

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let read_handle = handle.clone();
    handle
        .add(rfd, move |event| {
            if event != IoEvent::In {
                return;
            }
            let mut buf = [0u8; 16];
            loop {
                match nix::unistd::read(rfd, &mut buf) {
                    Ok(0) => {
                        read_handle.remove(rfd, true);
                        read_handle.stop();
                        return;
                    }
                    Ok(n) => sink.borrow_mut().extend_from_slice(&buf[..n]),
                    Err(nix::errno::Errno::EAGAIN) => return,
                    Err(e) => panic!("read failed: {e}"),
                }
            }
        })
        .unwrap();
    handle.set_events(rfd, true, false).unwrap();

    // Write from a timer so the data arrives while the loop is waiting.
    handle.schedule(
        move || {
            nix::unistd::write(&w, b"ten bytes!").unwrap();
            drop(w); // EOF lets the handler clean up
        },
        Duration::from_millis(5),
        false,
    );

    reactor.run().unwrap();
    assert_eq!(received.borrow().as_slice(), b"ten bytes!");
}

#[test]
fn runaway_requeueing_is_detected() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();

    fn requeue(handle: &ReactorHandle) {
        let again = handle.clone();
        handle.queue(move || requeue(&again));
    }
    requeue(&handle);

    assert!(matches!(
        reactor.run(),
        Err(ReactorError::RunawayCallbacks)
    ));
}

#[test]
fn nonblocking_pass_returns_immediately() {
    let mut reactor = Reactor::new().unwrap();
    // A far-away strong timer would block a normal pass.
    reactor.handle().schedule(|| {}, Duration::from_secs(30), false);
    let start = Instant::now();
    reactor.process(0).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn stop_makes_the_loop_return() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let stopper = handle.clone();
    // Strong timer far in the future keeps the loop alive; the queued
    // stop must win before the wait.
    handle.schedule(|| {}, Duration::from_secs(30), false);
    handle.queue(move || stopper.stop());
    let start = Instant::now();
    reactor.run().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}
