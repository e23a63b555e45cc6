// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master-side swarm manager.
//!
//! Owns every peer (one channel each) and the [`SwarmDriver`] that
//! fabricates requests and consumes responses. Whenever a peer is idle
//! the manager picks the next legal transition on a shortest
//! unrestricted path toward the target state, asks the driver to
//! generate the request, sends it, and advances the peer's state when
//! the response arrives. Exactly one request is in flight per peer.
//!
//! Driver callbacks receive a [`SwarmCtx`] view for everything they may
//! legitimately do mid-callback: flip restriction sets, retarget the
//! swarm, query peer states, or request an abort. Changes are applied
//! once the callback returns; idle peers are then re-dispatched until
//! the swarm settles.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use fw_wire::{Channel, Payload};

use crate::graph::{Kind, RestrictionSetId, StateGraph, StateId};
use crate::observer::SwarmObserver;
use crate::SwarmError;

/// Stable identity of a peer, assigned in connection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wire message that also carries the protocol's acknowledgement
/// frame: requests without a domain response are answered with
/// [`ProtocolMessage::ack`] so responses stay strictly request-ordered.
pub trait ProtocolMessage: Payload {
    fn ack() -> Self;
    fn is_ack(&self) -> bool;
}

/// The master logic plugged into a [`SwarmManager`].
pub trait SwarmDriver: 'static {
    type Message: ProtocolMessage;

    /// Fabricate the request of `kind` for a peer sitting in `from`.
    /// Returning `Ok(None)` idles the peer (no work available).
    fn generate(
        &mut self,
        ctx: &mut SwarmCtx<'_, Self::Message>,
        worker: WorkerId,
        from: StateId,
        kind: Kind,
    ) -> Result<Option<Self::Message>, SwarmError>;

    /// A request completed and the peer entered `entered`. `response`
    /// is `None` for kinds answered with a bare acknowledgement.
    fn on_response(
        &mut self,
        ctx: &mut SwarmCtx<'_, Self::Message>,
        worker: WorkerId,
        entered: StateId,
        response: Option<Self::Message>,
    ) -> Result<(), SwarmError>;

    /// A peer's channel failed. The peer is already forgotten; its last
    /// known state is given for recovery decisions.
    fn worker_failed(
        &mut self,
        ctx: &mut SwarmCtx<'_, Self::Message>,
        worker: WorkerId,
        last_state: StateId,
    );
}

struct Peer<M> {
    channel: Channel<M>,
    state: StateId,
    in_flight: Option<Kind>,
    idle_notified: bool,
}

struct Control {
    target: StateId,
    active: HashSet<RestrictionSetId>,
    /// Target or restrictions changed: idle peers need a re-dispatch.
    dirty: bool,
    target_changed: bool,
    restrictions_changed: bool,
    abort_requested: bool,
}

/// What a driver callback may see and change mid-flight.
pub struct SwarmCtx<'a, M> {
    graph: &'a StateGraph,
    control: &'a mut Control,
    peers: &'a BTreeMap<WorkerId, Peer<M>>,
}

impl<M> SwarmCtx<'_, M> {
    pub fn graph(&self) -> &StateGraph {
        self.graph
    }

    pub fn target_state(&self) -> StateId {
        self.control.target
    }

    pub fn set_target_state(&mut self, target: StateId) {
        if self.control.target != target {
            self.control.target = target;
            self.control.dirty = true;
            self.control.target_changed = true;
        }
    }

    pub fn activate_restriction_set(&mut self, set: RestrictionSetId) {
        if self.control.active.insert(set) {
            self.control.dirty = true;
            self.control.restrictions_changed = true;
        }
    }

    pub fn deactivate_restriction_set(&mut self, set: RestrictionSetId) {
        if self.control.active.remove(&set) {
            self.control.dirty = true;
            self.control.restrictions_changed = true;
        }
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.peers.keys().copied().collect()
    }

    /// `(state, busy)` for a live peer; busy means a request is in
    /// flight.
    pub fn worker_state(&self, worker: WorkerId) -> Option<(StateId, bool)> {
        self.peers
            .get(&worker)
            .map(|p| (p.state, p.in_flight.is_some()))
    }

    /// True when no live peer has a request in flight.
    pub fn all_idle(&self) -> bool {
        self.peers.values().all(|p| p.in_flight.is_none())
    }

    /// Tear down every channel once the current callback returns; no
    /// further messages are sent.
    pub fn abort(&mut self) {
        self.control.abort_requested = true;
        self.control.dirty = true;
    }
}

struct SwarmCore<D: SwarmDriver> {
    self_ref: Weak<RefCell<SwarmCore<D>>>,
    graph: Rc<StateGraph>,
    driver: D,
    control: Control,
    peers: BTreeMap<WorkerId, Peer<D::Message>>,
    observers: Vec<Rc<RefCell<dyn SwarmObserver>>>,
    next_worker: u32,
    start_state: StateId,
}

/// Master-side peer fleet. See the module docs.
pub struct SwarmManager<D: SwarmDriver> {
    core: Rc<RefCell<SwarmCore<D>>>,
}

impl<D: SwarmDriver> SwarmManager<D> {
    pub fn new(graph: Rc<StateGraph>, driver: D) -> Result<Self, SwarmError> {
        let start_state = graph.state("start")?;
        let core = Rc::new_cyclic(|weak| {
            RefCell::new(SwarmCore {
                self_ref: weak.clone(),
                graph,
                driver,
                control: Control {
                    target: start_state,
                    active: HashSet::new(),
                    dirty: false,
                    target_changed: false,
                    restrictions_changed: false,
                    abort_requested: false,
                },
                peers: BTreeMap::new(),
                observers: Vec::new(),
                next_worker: 0,
                start_state,
            })
        });
        Ok(Self { core })
    }

    pub fn graph(&self) -> Rc<StateGraph> {
        Rc::clone(&self.core.borrow().graph)
    }

    pub fn add_observer(&self, observer: Rc<RefCell<dyn SwarmObserver>>) {
        self.core.borrow_mut().observers.push(observer);
    }

    /// Adopt a connected channel as a new peer and start driving it.
    pub fn add_worker(&self, channel: Channel<D::Message>) -> Result<WorkerId, SwarmError> {
        let mut core = self.core.borrow_mut();
        let worker = WorkerId(core.next_worker);
        core.next_worker += 1;
        let weak = core.self_ref.clone();
        channel.set_error_handler(move |code| {
            if let Some(core) = weak.upgrade() {
                Self::peer_error_entry(&core, worker, code);
            }
        });
        let start = core.start_state;
        core.peers.insert(
            worker,
            Peer {
                channel,
                state: start,
                in_flight: None,
                idle_notified: false,
            },
        );
        tracing::debug!(%worker, "worker added");
        Self::notify_transition(&mut core, worker, None, start);
        Self::dispatch_peer(&mut core, worker)?;
        Self::settle(&mut core)?;
        Ok(worker)
    }

    pub fn set_target_state(&self, target: StateId) -> Result<(), SwarmError> {
        let mut core = self.core.borrow_mut();
        if core.control.target != target {
            core.control.target = target;
            core.control.dirty = true;
            core.control.target_changed = true;
        }
        Self::settle(&mut core)
    }

    pub fn activate_restriction_set(&self, set: RestrictionSetId) -> Result<(), SwarmError> {
        let mut core = self.core.borrow_mut();
        if core.control.active.insert(set) {
            core.control.dirty = true;
            core.control.restrictions_changed = true;
        }
        Self::settle(&mut core)
    }

    pub fn deactivate_restriction_set(&self, set: RestrictionSetId) -> Result<(), SwarmError> {
        let mut core = self.core.borrow_mut();
        if core.control.active.remove(&set) {
            core.control.dirty = true;
            core.control.restrictions_changed = true;
        }
        Self::settle(&mut core)
    }

    /// Run `f` against the driver alone (queries, statistics).
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.core.borrow_mut().driver)
    }

    /// Run `f` against the driver with a full [`SwarmCtx`], then apply
    /// whatever the callback changed.
    pub fn drive<R>(
        &self,
        f: impl FnOnce(&mut D, &mut SwarmCtx<'_, D::Message>) -> R,
    ) -> Result<R, SwarmError> {
        let mut core = self.core.borrow_mut();
        let out = {
            let SwarmCore {
                graph,
                driver,
                control,
                peers,
                ..
            } = &mut *core;
            let mut ctx = SwarmCtx {
                graph: &**graph,
                control,
                peers,
            };
            f(driver, &mut ctx)
        };
        Self::settle(&mut core)?;
        Ok(out)
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.core.borrow().peers.keys().copied().collect()
    }

    pub fn worker_state(&self, worker: WorkerId) -> Option<(StateId, bool)> {
        self.core
            .borrow()
            .peers
            .get(&worker)
            .map(|p| (p.state, p.in_flight.is_some()))
    }

    pub fn all_idle(&self) -> bool {
        self.core
            .borrow()
            .peers
            .values()
            .all(|p| p.in_flight.is_none())
    }

    /// Close every peer channel and forget the fleet. No further
    /// message traffic; peers see the hangup on their side.
    pub fn close_all(&self) {
        Self::close_all_peers(&mut self.core.borrow_mut());
    }

    fn close_all_peers(core: &mut SwarmCore<D>) {
        let peers = std::mem::take(&mut core.peers);
        for (_, peer) in peers {
            peer.channel.close();
        }
    }

    /// Entry point from a channel read handler.
    fn response_entry(core: &Rc<RefCell<SwarmCore<D>>>, worker: WorkerId, msg: D::Message) {
        let mut core = core.borrow_mut();
        if let Err(e) = Self::handle_response(&mut core, worker, msg) {
            tracing::error!(%worker, error = %e, "response handling failed; aborting swarm");
            Self::close_all_peers(&mut core);
        }
    }

    /// Entry point from a channel error handler.
    fn peer_error_entry(core: &Rc<RefCell<SwarmCore<D>>>, worker: WorkerId, code: i32) {
        let mut core = core.borrow_mut();
        let Some(peer) = core.peers.remove(&worker) else {
            return;
        };
        let last_state = peer.state;
        tracing::warn!(
            %worker,
            state = core.graph.name(last_state),
            errno = code,
            "worker channel failed"
        );
        peer.channel.close();
        {
            let SwarmCore {
                graph,
                driver,
                control,
                peers,
                ..
            } = &mut *core;
            let mut ctx = SwarmCtx {
                graph: &**graph,
                control,
                peers,
            };
            driver.worker_failed(&mut ctx, worker, last_state);
        }
        if let Err(e) = Self::settle(&mut core) {
            tracing::error!(error = %e, "settling after worker failure failed; aborting swarm");
            Self::close_all_peers(&mut core);
        }
    }

    fn handle_response(
        core: &mut SwarmCore<D>,
        worker: WorkerId,
        msg: D::Message,
    ) -> Result<(), SwarmError> {
        let peer = core
            .peers
            .get_mut(&worker)
            .ok_or(SwarmError::UnknownWorker(worker.0))?;
        let kind = peer.in_flight.take().ok_or(SwarmError::UnexpectedResponse)?;
        let from = peer.state;
        let entered = core
            .graph
            .next(from, kind)
            .ok_or_else(|| SwarmError::IllegalMessage {
                state: core.graph.name(from).to_string(),
                kind: kind.to_string(),
            })?;
        let peer = core
            .peers
            .get_mut(&worker)
            .ok_or(SwarmError::UnknownWorker(worker.0))?;
        peer.state = entered;
        peer.idle_notified = false;
        Self::notify_transition(core, worker, Some(from), entered);

        let response = if msg.is_ack() { None } else { Some(msg) };
        {
            let SwarmCore {
                graph,
                driver,
                control,
                peers,
                ..
            } = &mut *core;
            let mut ctx = SwarmCtx {
                graph: &**graph,
                control,
                peers,
            };
            driver.on_response(&mut ctx, worker, entered, response)?;
        }
        Self::dispatch_peer(core, worker)?;
        Self::settle(core)
    }

    /// Drive one idle peer one step toward the target, if possible.
    fn dispatch_peer(core: &mut SwarmCore<D>, worker: WorkerId) -> Result<(), SwarmError> {
        let Some(peer) = core.peers.get(&worker) else {
            return Ok(());
        };
        if peer.in_flight.is_some() {
            return Ok(());
        }
        let state = peer.state;
        let choice = core
            .graph
            .next_toward(state, core.control.target, &core.control.active);
        let Some((kind, _)) = choice else {
            Self::mark_idle(core, worker);
            return Ok(());
        };

        let msg = {
            let SwarmCore {
                graph,
                driver,
                control,
                peers,
                ..
            } = &mut *core;
            let mut ctx = SwarmCtx {
                graph: &**graph,
                control,
                peers,
            };
            driver.generate(&mut ctx, worker, state, kind)?
        };
        let Some(msg) = msg else {
            Self::mark_idle(core, worker);
            return Ok(());
        };

        let weak = core.self_ref.clone();
        let peer = core
            .peers
            .get_mut(&worker)
            .ok_or(SwarmError::UnknownWorker(worker.0))?;
        peer.in_flight = Some(kind);
        peer.idle_notified = false;
        tracing::debug!(%worker, kind, "sending request");
        peer.channel.set_read_handler(move |response| {
            if let Some(core) = weak.upgrade() {
                Self::response_entry(&core, worker, response);
            }
        })?;
        peer.channel.write(&msg, || {})?;
        Ok(())
    }

    /// Apply control changes made by driver callbacks: notify
    /// observers, honour an abort request, and re-dispatch idle peers
    /// until nothing changes any more.
    fn settle(core: &mut SwarmCore<D>) -> Result<(), SwarmError> {
        loop {
            if core.control.target_changed {
                core.control.target_changed = false;
                let target = core.control.target;
                for observer in core.observers.clone() {
                    observer.borrow_mut().on_target_changed(target);
                }
            }
            if core.control.restrictions_changed {
                core.control.restrictions_changed = false;
                let active = core.control.active.clone();
                for observer in core.observers.clone() {
                    observer.borrow_mut().on_restrictions_changed(&active);
                }
            }
            if core.control.abort_requested {
                core.control.abort_requested = false;
                core.control.dirty = false;
                Self::close_all_peers(core);
                return Ok(());
            }
            if !core.control.dirty {
                return Ok(());
            }
            core.control.dirty = false;
            let idle: Vec<WorkerId> = core
                .peers
                .iter()
                .filter(|(_, p)| p.in_flight.is_none())
                .map(|(w, _)| *w)
                .collect();
            for worker in idle {
                Self::dispatch_peer(core, worker)?;
            }
        }
    }

    fn mark_idle(core: &mut SwarmCore<D>, worker: WorkerId) {
        let Some(peer) = core.peers.get_mut(&worker) else {
            return;
        };
        if peer.idle_notified {
            return;
        }
        peer.idle_notified = true;
        let state = peer.state;
        for observer in core.observers.clone() {
            observer.borrow_mut().on_idle(worker, state);
        }
    }

    fn notify_transition(
        core: &mut SwarmCore<D>,
        worker: WorkerId,
        from: Option<StateId>,
        to: StateId,
    ) {
        for observer in core.observers.clone() {
            observer.borrow_mut().on_state_transition(worker, from, to);
        }
    }
}

#[cfg(test)]
#[path = "swarm_tests.rs"]
mod tests;
