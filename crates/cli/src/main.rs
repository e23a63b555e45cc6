// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fieldwork: distributed event-range processing.
//!
//! `master` binds a TCP port and farms the configured datasets out to
//! connecting workers; `worker` connects to a master and does the work;
//! `local` forks a fleet of workers on this machine and runs both
//! sides.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fw_job::{local_run, logging, messages, Master, ProgressReporter, Worker};
use fw_reactor::Reactor;
use fw_wire::{connect_to, Channel, TcpAcceptor};

mod stopper;

#[derive(Parser)]
#[command(name = "fieldwork", version, about = "distributed event-range processing")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the master: accept workers on a TCP port and process the
    /// configured datasets.
    Master {
        port: u16,
        configfile: PathBuf,
    },
    /// Run a worker connected to a master.
    Worker {
        host: String,
        port: u16,
    },
    /// Run master and a fleet of forked workers on this machine.
    Local {
        configfile: PathBuf,
        /// Number of worker processes; defaults to the number of CPUs.
        nworkers: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Master { port, configfile } => run_master(port, &configfile),
        Command::Worker { host, port } => run_worker(&host, port),
        Command::Local {
            configfile,
            nworkers,
        } => run_local(&configfile, nworkers),
    };
    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run_master(port: u16, configfile: &std::path::Path) -> anyhow::Result<()> {
    logging::init_stderr();
    let config = fw_job::JobConfig::load(configfile)?;

    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();
    let registry = Rc::new(messages::registry()?);

    let master = Master::new(config)?;
    master.add_observer(Rc::new(RefCell::new(ProgressReporter::new(master.graph()))));

    let acceptor = Rc::new(RefCell::new(TcpAcceptor::new(&handle)));
    master.add_observer(stopper::Stopper::new(&master, &acceptor)?);

    // SIGINT aborts without further traffic; workers see the hangup.
    let sigint_master = master.clone();
    let sigint_acceptor = Rc::clone(&acceptor);
    let sigint_handle = handle.clone();
    reactor.setup_signal_handler(libc::SIGINT, move |_| {
        eprintln!("SIGINT: aborting master");
        sigint_master.abort();
        sigint_acceptor.borrow_mut().stop();
        sigint_handle.stop();
    })?;

    master.start()?;
    {
        let accept_master = master.clone();
        let accept_handle = handle.clone();
        let accept_registry = Rc::clone(&registry);
        acceptor
            .borrow_mut()
            .start("*", port, move |fd| {
                let channel = match Channel::new(fd, &accept_handle, Rc::clone(&accept_registry)) {
                    Ok(channel) => channel,
                    Err(e) => {
                        tracing::error!(error = %e, "could not wrap worker connection");
                        return;
                    }
                };
                if let Err(e) = accept_master.add_worker(channel) {
                    tracing::error!(error = %e, "could not adopt worker");
                }
            })
            .with_context(|| format!("binding *:{port}"))?;
    }

    reactor.run()?;

    if master.failed() || !master.completed() {
        bail!("data NOT processed completely; see log for details");
    }
    println!("Master completed successfully.");
    Ok(())
}

fn run_worker(host: &str, port: u16) -> anyhow::Result<()> {
    logging::init_stderr();
    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();
    let registry = Rc::new(messages::registry()?);

    let fd = connect_to(host, port).with_context(|| format!("connecting to {host}:{port}"))?;
    let worker = Worker::new()?;
    worker.setup(Channel::new(fd, &handle, registry)?)?;

    reactor.run()?;

    if !worker.stopped_successfully() {
        bail!("worker NOT successful (see log for details)");
    }
    println!("worker exiting successfully");
    Ok(())
}

fn run_local(configfile: &std::path::Path, nworkers: Option<usize>) -> anyhow::Result<()> {
    logging::init_stderr();
    let nworkers = match nworkers {
        Some(n) if n == 0 || n > 1000 => bail!("nworkers out of range (1..=1000)"),
        Some(n) => n,
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(16),
    };
    local_run(configfile, nworkers)?;
    println!("Master completed successfully.");
    Ok(())
}
