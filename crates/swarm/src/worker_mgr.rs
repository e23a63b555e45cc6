// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker-side request loop.
//!
//! One channel to the master, one state, one handler. Every incoming
//! message is checked against the state graph, handed to the
//! [`WorkerHandler`], answered (with the handler's response or a bare
//! acknowledgement), and the state advances deterministically. Illegal
//! messages and handler failures close the channel; the master sees the
//! hangup and treats the worker as failed.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use fw_wire::{Channel, Payload};

use crate::graph::{StateGraph, StateId};
use crate::swarm::ProtocolMessage;
use crate::SwarmError;

/// Answers the master's requests on the worker.
pub trait WorkerHandler: 'static {
    type Message: ProtocolMessage;

    /// Handle one request. `Ok(None)` sends a bare acknowledgement;
    /// an error closes the channel and fails the worker.
    fn handle(&mut self, msg: Self::Message) -> Result<Option<Self::Message>, SwarmError>;
}

struct WmCore<H: WorkerHandler> {
    self_ref: Weak<RefCell<WmCore<H>>>,
    graph: Rc<StateGraph>,
    handler: H,
    channel: Option<Channel<H::Message>>,
    state: StateId,
    stop_state: StateId,
    failed: bool,
}

pub struct WorkerManager<H: WorkerHandler> {
    core: Rc<RefCell<WmCore<H>>>,
}

impl<H: WorkerHandler> WorkerManager<H> {
    pub fn new(graph: Rc<StateGraph>, handler: H) -> Result<Self, SwarmError> {
        let state = graph.state("start")?;
        let stop_state = graph.state("stop")?;
        let core = Rc::new_cyclic(|weak| {
            RefCell::new(WmCore {
                self_ref: weak.clone(),
                graph,
                handler,
                channel: None,
                state,
                stop_state,
                failed: false,
            })
        });
        Ok(Self { core })
    }

    /// Adopt the channel to the master and start answering requests.
    pub fn start(&self, channel: Channel<H::Message>) -> Result<(), SwarmError> {
        {
            let mut core = self.core.borrow_mut();
            let weak = core.self_ref.clone();
            channel.set_error_handler(move |code| {
                if let Some(core) = weak.upgrade() {
                    Self::channel_failed(&core, code);
                }
            });
            core.channel = Some(channel);
        }
        Self::arm_read(&self.core)
    }

    /// The state this worker currently sits in.
    pub fn state(&self) -> StateId {
        self.core.borrow().state
    }

    /// True once the master has driven this worker into `stop` and
    /// nothing went wrong on the way.
    pub fn stopped_successfully(&self) -> bool {
        let core = self.core.borrow();
        core.state == core.stop_state && !core.failed
    }

    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.core.borrow_mut().handler)
    }

    fn arm_read(core_rc: &Rc<RefCell<WmCore<H>>>) -> Result<(), SwarmError> {
        let core = core_rc.borrow();
        let Some(channel) = &core.channel else {
            return Ok(());
        };
        let weak = core.self_ref.clone();
        channel.set_read_handler(move |msg| {
            if let Some(core) = weak.upgrade() {
                Self::on_message(&core, msg);
            }
        })?;
        Ok(())
    }

    fn on_message(core_rc: &Rc<RefCell<WmCore<H>>>, msg: H::Message) {
        {
            let mut core = core_rc.borrow_mut();
            let kind = msg.kind();
            let Some(next) = core.graph.next(core.state, kind) else {
                tracing::error!(
                    state = core.graph.name(core.state),
                    kind,
                    "illegal request; closing channel"
                );
                Self::fail(&mut core);
                return;
            };
            let response = match core.handler.handle(msg) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(kind, error = %e, "request handler failed; closing channel");
                    Self::fail(&mut core);
                    return;
                }
            };
            core.state = next;
            let response = response.unwrap_or_else(H::Message::ack);
            if let Some(channel) = &core.channel {
                if let Err(e) = channel.write(&response, || {}) {
                    tracing::error!(error = %e, "sending response failed; closing channel");
                    Self::fail(&mut core);
                    return;
                }
            }
        }
        if let Err(e) = Self::arm_read(core_rc) {
            tracing::error!(error = %e, "re-arming read handler failed");
            Self::fail(&mut core_rc.borrow_mut());
        }
    }

    fn channel_failed(core_rc: &Rc<RefCell<WmCore<H>>>, code: i32) {
        let mut core = core_rc.borrow_mut();
        if core.state == core.stop_state {
            tracing::debug!(errno = code, "master closed the connection after stop");
        } else {
            tracing::error!(
                errno = code,
                state = core.graph.name(core.state),
                "lost connection to master"
            );
            core.failed = true;
        }
        core.channel = None;
    }

    fn fail(core: &mut WmCore<H>) {
        core.failed = true;
        if let Some(channel) = core.channel.take() {
            channel.close();
        }
    }
}

#[cfg(test)]
#[path = "worker_mgr_tests.rs"]
mod tests;
