// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end drive of a miniature protocol: a swarm manager on one end
//! of a socketpair, a worker manager on the other, both in one reactor.

use super::*;
use crate::{StateGraph, WorkerHandler, WorkerManager};
use bytes::{BufMut, BytesMut};
use fw_reactor::Reactor;
use fw_wire::{get_u32, socketpair_stream, Payload, Registry};

#[derive(Debug, Clone, PartialEq)]
enum Mini {
    Hello,
    Task { n: u32 },
    TaskDone { n: u32 },
    Halt,
    Ack,
}

impl Payload for Mini {
    fn kind(&self) -> &'static str {
        match self {
            Mini::Hello => "hello",
            Mini::Task { .. } => "task",
            Mini::TaskDone { .. } => "taskdone",
            Mini::Halt => "halt",
            Mini::Ack => "ack",
        }
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            Mini::Task { n } | Mini::TaskDone { n } => out.put_u32_le(*n),
            Mini::Hello | Mini::Halt | Mini::Ack => {}
        }
    }
}

impl ProtocolMessage for Mini {
    fn ack() -> Self {
        Mini::Ack
    }

    fn is_ack(&self) -> bool {
        matches!(self, Mini::Ack)
    }
}

fn registry() -> Rc<Registry<Mini>> {
    let mut reg = Registry::new();
    reg.register("hello", |_| Ok(Mini::Hello)).unwrap();
    reg.register("task", |b| Ok(Mini::Task { n: get_u32(b)? }))
        .unwrap();
    reg.register("taskdone", |b| Ok(Mini::TaskDone { n: get_u32(b)? }))
        .unwrap();
    reg.register("halt", |_| Ok(Mini::Halt)).unwrap();
    reg.register("ack", |_| Ok(Mini::Ack)).unwrap();
    Rc::new(reg)
}

/// start --hello--> ready --task--> ready, ready --halt--> stop, with a
/// "notask" restriction on the self-loop.
fn mini_graph() -> StateGraph {
    let mut g = StateGraph::new();
    let start = g.state("start").unwrap();
    let stop = g.state("stop").unwrap();
    let ready = g.add_state("ready").unwrap();
    g.add_transition("hello", start, ready).unwrap();
    g.add_transition("task", ready, ready).unwrap();
    g.add_transition("halt", ready, stop).unwrap();
    let notask = g.add_restriction_set("notask").unwrap();
    g.add_restriction(notask, ready, ready).unwrap();
    g
}

/// Master logic: hand out `total` numbered tasks, collect the results,
/// then drive everyone to stop and hang up.
struct MiniDriver {
    total: u32,
    next: u32,
    done: Vec<u32>,
    ready: StateId,
    stop: StateId,
    notask: RestrictionSetId,
    failed_workers: Vec<WorkerId>,
}

impl MiniDriver {
    fn new(graph: &StateGraph, total: u32) -> Self {
        Self {
            total,
            next: 0,
            done: Vec::new(),
            ready: graph.state("ready").unwrap(),
            stop: graph.state("stop").unwrap(),
            notask: graph.restriction_set("notask").unwrap(),
            failed_workers: Vec::new(),
        }
    }
}

impl SwarmDriver for MiniDriver {
    type Message = Mini;

    fn generate(
        &mut self,
        ctx: &mut SwarmCtx<'_, Mini>,
        _worker: WorkerId,
        _from: StateId,
        kind: Kind,
    ) -> Result<Option<Mini>, SwarmError> {
        match kind {
            "hello" => Ok(Some(Mini::Hello)),
            "task" => {
                if self.next == self.total {
                    ctx.activate_restriction_set(self.notask);
                    return Ok(None);
                }
                self.next += 1;
                if self.next == self.total {
                    ctx.activate_restriction_set(self.notask);
                }
                Ok(Some(Mini::Task { n: self.next }))
            }
            "halt" => Ok(Some(Mini::Halt)),
            other => Err(SwarmError::IllegalMessage {
                state: "?".to_string(),
                kind: other.to_string(),
            }),
        }
    }

    fn on_response(
        &mut self,
        ctx: &mut SwarmCtx<'_, Mini>,
        _worker: WorkerId,
        entered: StateId,
        response: Option<Mini>,
    ) -> Result<(), SwarmError> {
        if entered == self.ready {
            if let Some(Mini::TaskDone { n }) = response {
                self.done.push(n);
            }
            if self.total > 0 && self.done.len() as u32 == self.total && ctx.all_idle() {
                ctx.set_target_state(self.stop);
            }
        } else if entered == self.stop {
            let all_stopped = ctx
                .workers()
                .iter()
                .all(|w| matches!(ctx.worker_state(*w), Some((s, false)) if s == self.stop));
            if all_stopped {
                ctx.abort(); // hang up; workers exit on the reset
            }
        }
        Ok(())
    }

    fn worker_failed(
        &mut self,
        _ctx: &mut SwarmCtx<'_, Mini>,
        worker: WorkerId,
        _last_state: StateId,
    ) {
        self.failed_workers.push(worker);
    }
}

struct MiniWorker {
    tasks_seen: Vec<u32>,
}

impl WorkerHandler for MiniWorker {
    type Message = Mini;

    fn handle(&mut self, msg: Mini) -> Result<Option<Mini>, SwarmError> {
        match msg {
            Mini::Hello | Mini::Halt => Ok(None),
            Mini::Task { n } => {
                self.tasks_seen.push(n);
                Ok(Some(Mini::TaskDone { n }))
            }
            other => Err(SwarmError::Handler(format!("unexpected request {other:?}"))),
        }
    }
}

fn run_mini(nworkers: usize, total: u32) {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let reg = registry();
    let graph = Rc::new(mini_graph());
    let ready = graph.state("ready").unwrap();

    let driver = MiniDriver::new(&graph, total);
    let swarm = SwarmManager::new(Rc::clone(&graph), driver).unwrap();
    swarm.set_target_state(ready).unwrap();

    let mut worker_mgrs = Vec::new();
    for _ in 0..nworkers {
        let (a, b) = socketpair_stream().unwrap();
        let master_chan = Channel::new(a, &handle, Rc::clone(&reg)).unwrap();
        let worker_chan = Channel::new(b, &handle, Rc::clone(&reg)).unwrap();
        let wm = WorkerManager::new(Rc::clone(&graph), MiniWorker { tasks_seen: Vec::new() })
            .unwrap();
        wm.start(worker_chan).unwrap();
        swarm.add_worker(master_chan).unwrap();
        worker_mgrs.push(wm);
    }

    reactor.run().unwrap();

    // Every task was handed out exactly once and every result returned.
    let mut done = swarm.with_driver(|d| d.done.clone());
    done.sort_unstable();
    assert_eq!(done, (1..=total).collect::<Vec<_>>());
    assert!(swarm.with_driver(|d| d.failed_workers.is_empty()));

    // All workers were driven into stop and saw disjoint task sets.
    let mut all_seen = Vec::new();
    for wm in &worker_mgrs {
        assert!(wm.stopped_successfully());
        wm.with_handler(|h| all_seen.extend(h.tasks_seen.iter().copied()));
    }
    all_seen.sort_unstable();
    assert_eq!(all_seen, (1..=total).collect::<Vec<_>>());
}

#[test]
fn one_worker_drains_the_task_pool() {
    run_mini(1, 7);
}

#[test]
fn four_workers_share_the_task_pool() {
    run_mini(4, 23);
}

#[test]
fn worker_hangup_reaches_the_driver() {
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.handle();
    let reg = registry();
    let graph = Rc::new(mini_graph());
    let ready = graph.state("ready").unwrap();

    // A driver with no tasks: the peer idles at ready after hello.
    let driver = MiniDriver::new(&graph, 0);
    let swarm = SwarmManager::new(Rc::clone(&graph), driver).unwrap();
    swarm.set_target_state(ready).unwrap();

    let (a, b) = socketpair_stream().unwrap();
    let master_chan = Channel::new(a, &handle, Rc::clone(&reg)).unwrap();
    let worker_chan = Channel::new(b, &handle, Rc::clone(&reg)).unwrap();
    let wm = WorkerManager::new(Rc::clone(&graph), MiniWorker { tasks_seen: Vec::new() })
        .unwrap();
    wm.start(worker_chan).unwrap();
    let wid = swarm.add_worker(master_chan).unwrap();

    // Kill the worker side once everything settles.
    handle.schedule(
        move || drop(wm), // closes the worker channel
        std::time::Duration::from_millis(20),
        false,
    );

    reactor.run().unwrap();
    assert_eq!(swarm.with_driver(|d| d.failed_workers.clone()), vec![wid]);
    assert!(swarm.workers().is_empty());
}
