// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local mode: master and workers on one machine.
//!
//! Spawns `nworkers` worker processes with `fork()`, each connected to
//! the parent by one end of an `AF_UNIX` stream socketpair, then runs
//! the master over the other ends. Each child builds its own fresh
//! reactor; nothing of the parent's event loop survives into a child.

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::rc::Rc;

use fw_reactor::Reactor;
use fw_wire::{socketpair_stream, Channel};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};

use crate::master::{Master, ProgressReporter};
use crate::messages;
use crate::worker::Worker;
use crate::{JobConfig, JobError};

/// Run the whole job locally. Fails unless every dataset was processed
/// completely and merged.
pub fn local_run(config_path: &Path, nworkers: usize) -> Result<(), JobError> {
    // Validate the config before spawning anything.
    let config = JobConfig::load(config_path)?;
    fw_reactor::on_fork_child(|| {
        tracing::info!(pid = std::process::id(), "worker child started");
    });

    let mut children: Vec<Pid> = Vec::new();
    let mut master_fds: Vec<OwnedFd> = Vec::new();
    for _ in 0..nworkers {
        let (master_end, worker_end) = socketpair_stream()?;
        // Safety: both processes are single-threaded and the child
        // only runs the code below this match before exiting.
        match unsafe { fork() }? {
            ForkResult::Child => {
                drop(master_end);
                // Close the inherited master ends of earlier workers,
                // or their hangups would go unnoticed.
                master_fds.clear();
                fw_reactor::run_child_hooks();
                let ok = run_worker_child(worker_end).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "worker failed");
                    false
                });
                std::process::exit(if ok { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                drop(worker_end);
                children.push(child);
                master_fds.push(master_end);
            }
        }
    }

    let result = run_master(config, master_fds);

    for pid in children {
        loop {
            match waitpid(pid, None) {
                Ok(_) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(%pid, error = %e, "waitpid failed");
                    break;
                }
            }
        }
    }
    result
}

fn run_master(config: JobConfig, master_fds: Vec<OwnedFd>) -> Result<(), JobError> {
    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();
    let registry = Rc::new(messages::registry()?);

    let master = Master::new(config)?;
    master.add_observer(Rc::new(RefCell::new(ProgressReporter::new(master.graph()))));
    master.start()?;
    for fd in master_fds {
        master.add_worker(Channel::new(fd, &handle, Rc::clone(&registry))?)?;
    }
    reactor.run()?;

    tracing::info!("master loop finished; waiting for worker processes");
    if master.failed() || !master.completed() {
        return Err(JobError::Incomplete);
    }
    Ok(())
}

fn run_worker_child(fd: OwnedFd) -> Result<bool, JobError> {
    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();
    let registry = Rc::new(messages::registry()?);

    let worker = Worker::new()?;
    worker.setup(Channel::new(fd, &handle, registry)?)?;
    reactor.run()?;
    Ok(worker.stopped_successfully())
}
