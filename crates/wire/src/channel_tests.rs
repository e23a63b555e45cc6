// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{get_str, get_u64, put_str, socketpair_stream};
use bytes::BufMut;
use fw_reactor::Reactor;

#[derive(Debug, Clone, PartialEq)]
enum TestMsg {
    Data { seq: u64, payload: String },
    Done,
}

impl Payload for TestMsg {
    fn kind(&self) -> &'static str {
        match self {
            TestMsg::Data { .. } => "data",
            TestMsg::Done => "done",
        }
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            TestMsg::Data { seq, payload } => {
                out.put_u64_le(*seq);
                put_str(out, payload);
            }
            TestMsg::Done => {}
        }
    }
}

fn registry() -> Rc<Registry<TestMsg>> {
    let mut reg = Registry::new();
    reg.register("data", |input| {
        Ok(TestMsg::Data {
            seq: get_u64(input)?,
            payload: get_str(input)?,
        })
    })
    .unwrap();
    reg.register("done", |_| Ok(TestMsg::Done)).unwrap();
    Rc::new(reg)
}

fn channel_pair(reactor: &Reactor) -> (Channel<TestMsg>, Channel<TestMsg>) {
    let (a, b) = socketpair_stream().unwrap();
    let reg = registry();
    let left = Channel::new(a, &reactor.handle(), Rc::clone(&reg)).unwrap();
    let right = Channel::new(b, &reactor.handle(), reg).unwrap();
    (left, right)
}

/// Ten round trips of a ten-byte payload between two channels over a
/// socketpair; both sides close cleanly afterwards and the loop drains.
#[test]
fn ping_pong_ten_rounds() {
    const ROUNDS: u64 = 10;
    let mut reactor = Reactor::new().unwrap();
    let (left, right) = channel_pair(&reactor);

    let received: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));

    // Echo side: answer every message with the next sequence number.
    fn arm_echo(chan: &Channel<TestMsg>) {
        let chan2 = chan.clone();
        chan.set_read_handler(move |msg| {
            let TestMsg::Data { seq, payload } = msg else {
                chan2.close();
                return;
            };
            assert_eq!(payload.len(), 10);
            let reply = TestMsg::Data {
                seq: seq + 1,
                payload: "0123456789".to_string(),
            };
            chan2.write(&reply, || {}).unwrap();
            arm_echo(&chan2);
        })
        .unwrap();
    }
    arm_echo(&right);

    // Driving side: send, await reply, repeat.
    fn arm_driver(chan: &Channel<TestMsg>, received: &Rc<RefCell<Vec<u64>>>) {
        let chan2 = chan.clone();
        let received2 = Rc::clone(received);
        chan.set_read_handler(move |msg| {
            let TestMsg::Data { seq, .. } = msg else {
                return;
            };
            received2.borrow_mut().push(seq);
            if seq >= 2 * ROUNDS {
                chan2.write(&TestMsg::Done, {
                    let chan3 = chan2.clone();
                    move || chan3.close()
                })
                .unwrap();
                return;
            }
            chan2
                .write(
                    &TestMsg::Data {
                        seq: seq + 1,
                        payload: "9876543210".to_string(),
                    },
                    || {},
                )
                .unwrap();
            arm_driver(&chan2, &received2);
        })
        .unwrap();
    }
    arm_driver(&left, &received);
    left.write(
        &TestMsg::Data {
            seq: 1,
            payload: "9876543210".to_string(),
        },
        || {},
    )
    .unwrap();

    reactor.run().unwrap();

    // Replies carry even sequence numbers 2, 4, .., 2*ROUNDS.
    let got = received.borrow();
    assert_eq!(got.len(), ROUNDS as usize);
    assert_eq!(*got, (1..=ROUNDS).map(|i| 2 * i).collect::<Vec<_>>());
    assert!(left.is_closed());
    assert!(right.is_closed());
}

#[test]
fn oversize_frame_fails_receiver_with_emsgsize() {
    let mut reactor = Reactor::new().unwrap();
    let (left, right) = channel_pair(&reactor);
    right.set_max_message_size(64);

    let code: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
    let code2 = Rc::clone(&code);
    right.set_read_handler(|_| panic!("oversize frame must not decode")).unwrap();
    right.set_error_handler(move |c| *code2.borrow_mut() = Some(c));

    let big = TestMsg::Data {
        seq: 0,
        payload: "x".repeat(4096),
    };
    let left2 = left.clone();
    left.write(&big, move || left2.close()).unwrap();

    reactor.run().unwrap();
    assert_eq!(*code.borrow(), Some(libc::EMSGSIZE));
    assert!(right.is_closed());
}

#[test]
fn peer_close_surfaces_as_connreset_at_message_boundary() {
    let mut reactor = Reactor::new().unwrap();
    let (left, right) = channel_pair(&reactor);

    let code: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
    let code2 = Rc::clone(&code);
    right.set_read_handler(|_| {}).unwrap();
    right.set_error_handler(move |c| *code2.borrow_mut() = Some(c));

    left.close();
    reactor.run().unwrap();
    assert_eq!(*code.borrow(), Some(libc::ECONNRESET));
}

#[test]
fn second_write_while_busy_is_rejected() {
    let reactor = Reactor::new().unwrap();
    let (left, _right) = channel_pair(&reactor);
    left.write(&TestMsg::Done, || {}).unwrap();
    assert!(matches!(
        left.write(&TestMsg::Done, || {}),
        Err(WireError::WriteBusy)
    ));
}

#[test]
fn second_read_handler_is_rejected() {
    let reactor = Reactor::new().unwrap();
    let (left, _right) = channel_pair(&reactor);
    left.set_read_handler(|_| {}).unwrap();
    assert!(matches!(
        left.set_read_handler(|_| {}),
        Err(WireError::ReadBusy)
    ));
}
