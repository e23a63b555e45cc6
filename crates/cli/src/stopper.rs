// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stops accepting new workers once the job is winding down.

use std::cell::RefCell;
use std::rc::Rc;

use fw_job::{Master, MasterObserver};
use fw_swarm::{StateId, SwarmObserver};
use fw_wire::TcpAcceptor;

/// Closes the listening socket when the swarm target becomes `stop` or
/// `failed`; a worker connecting after that point has nothing to do.
pub struct Stopper {
    acceptor: Rc<RefCell<TcpAcceptor>>,
    stop: StateId,
    failed: StateId,
}

impl Stopper {
    pub fn new(
        master: &Master,
        acceptor: &Rc<RefCell<TcpAcceptor>>,
    ) -> anyhow::Result<Rc<RefCell<Self>>> {
        let graph = master.graph();
        Ok(Rc::new(RefCell::new(Self {
            acceptor: Rc::clone(acceptor),
            stop: graph.state("stop")?,
            failed: graph.state("failed")?,
        })))
    }
}

impl SwarmObserver for Stopper {
    fn on_target_changed(&mut self, target: StateId) {
        if target == self.stop || target == self.failed {
            tracing::debug!("winding down; no longer accepting worker connections");
            self.acceptor.borrow_mut().stop();
        }
    }
}

impl MasterObserver for Stopper {}
