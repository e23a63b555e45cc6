// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use bytes::BytesMut;
use fw_reactor::Reactor;
use fw_wire::{socketpair_stream, Payload, Registry};

#[derive(Debug, Clone, PartialEq)]
enum Probe {
    Go,
    Ack,
}

impl Payload for Probe {
    fn kind(&self) -> &'static str {
        match self {
            Probe::Go => "go",
            Probe::Ack => "ack",
        }
    }

    fn encode_body(&self, _out: &mut BytesMut) {}
}

impl ProtocolMessage for Probe {
    fn ack() -> Self {
        Probe::Ack
    }

    fn is_ack(&self) -> bool {
        matches!(self, Probe::Ack)
    }
}

fn registry() -> Rc<Registry<Probe>> {
    let mut reg = Registry::new();
    reg.register("go", |_| Ok(Probe::Go)).unwrap();
    reg.register("ack", |_| Ok(Probe::Ack)).unwrap();
    Rc::new(reg)
}

struct CountingHandler {
    calls: Rc<RefCell<u32>>,
}

impl WorkerHandler for CountingHandler {
    type Message = Probe;

    fn handle(&mut self, _msg: Probe) -> Result<Option<Probe>, SwarmError> {
        *self.calls.borrow_mut() += 1;
        Ok(None)
    }
}

/// Graph where "go" is only legal in `running`, never in `start`.
fn probe_graph() -> Rc<StateGraph> {
    let mut g = StateGraph::new();
    let running = g.add_state("running").unwrap();
    g.add_transition("go", running, running).unwrap();
    Rc::new(g)
}

#[test]
fn illegal_request_closes_the_channel_without_calling_the_handler() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let reg = registry();

    let (a, b) = socketpair_stream().unwrap();
    let master_chan = Channel::new(a, &handle, Rc::clone(&reg)).unwrap();
    let worker_chan = Channel::new(b, &handle, Rc::clone(&reg)).unwrap();

    let calls = Rc::new(RefCell::new(0));
    let wm = WorkerManager::new(
        probe_graph(),
        CountingHandler {
            calls: Rc::clone(&calls),
        },
    )
    .unwrap();
    wm.start(worker_chan).unwrap();

    // "go" is not a legal transition out of `start`.
    let failed = Rc::new(RefCell::new(false));
    let failed2 = Rc::clone(&failed);
    master_chan.set_error_handler(move |_| *failed2.borrow_mut() = true);
    master_chan.set_read_handler(|_| {}).unwrap();
    master_chan.write(&Probe::Go, || {}).unwrap();

    reactor.run().unwrap();

    assert_eq!(*calls.borrow(), 0);
    assert!(*failed.borrow(), "master side must see the hangup");
    assert!(!wm.stopped_successfully());
}
