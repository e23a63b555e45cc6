// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event loop proper.
//!
//! [`Reactor`] owns the poll and runs the loop; cloneable
//! [`ReactorHandle`]s perform every registration. Handlers are invoked
//! one at a time, always from [`Reactor::process`], so no locking is
//! needed anywhere: handlers freely keep `Rc<RefCell<..>>` state.
//!
//! Iteration order within one pass: drain deferred callbacks, check for
//! the ground state (nothing but weak timers left), wait for readiness
//! with a deadline at the soonest timer, dispatch ready fds (input,
//! then output, then error per fd, draining deferred callbacks after
//! each handler), then fire expired timers bounded by the count that
//! was pending before the wait.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::errno::Errno;

use crate::error::ReactorError;
use crate::signals::SignalEntry;
use crate::timers::{TimerHandle, TimerSet};

/// Readiness event delivered to an fd handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoEvent {
    /// The fd is readable.
    In,
    /// The fd is writable.
    Out,
    /// An error or hangup was reported; the payload is a POSIX errno.
    /// The handler must remove its fd.
    Error(i32),
}

type FdHandler = Box<dyn FnMut(IoEvent)>;

struct FdEntry {
    /// `None` while the handler is on loan to a running dispatch.
    handler: Option<FdHandler>,
    want_in: bool,
    want_out: bool,
    /// Internal fds (signal pipes) do not count as user work.
    internal: bool,
}

struct Shared {
    registry: mio::Registry,
    fds: HashMap<RawFd, FdEntry>,
    /// Number of registered non-internal fds.
    nuser: usize,
    queue: VecDeque<Box<dyn FnOnce()>>,
    /// Synthetic readiness checks queued by `set_events`; mio
    /// registrations are edge-triggered, so enabling interest must
    /// re-check readiness instead of waiting for an edge that may have
    /// already passed.
    pokes: VecDeque<(RawFd, bool, bool)>,
    timers: TimerSet,
    /// Handlers of fds removed during the current pass; kept alive
    /// until the pass finishes so state owned by the closure outlives
    /// any event still in flight for the batch.
    retired: Vec<FdHandler>,
    stopped: bool,
}

/// Cloneable registration interface to a [`Reactor`].
///
/// Handlers capture a handle to register further fds, timers and
/// deferred callbacks; the loop itself is only reachable through the
/// owning [`Reactor`], so a handler can never re-enter `process`.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Rc<RefCell<Shared>>,
}

impl ReactorHandle {
    /// Register `fd`. The fd is switched to non-blocking mode; initial
    /// interest is errors only (enable readiness via [`set_events`]).
    ///
    /// [`set_events`]: ReactorHandle::set_events
    pub fn add(
        &self,
        fd: RawFd,
        handler: impl FnMut(IoEvent) + 'static,
    ) -> Result<(), ReactorError> {
        self.add_entry(fd, Box::new(handler), false)
    }

    fn add_entry(&self, fd: RawFd, handler: FdHandler, internal: bool) -> Result<(), ReactorError> {
        let mut sh = self.shared.borrow_mut();
        if sh.fds.contains_key(&fd) {
            return Err(ReactorError::FdExists(fd));
        }
        set_nonblocking(fd)?;
        sh.registry.register(
            &mut SourceFd(&fd),
            Token(fd as usize),
            Interest::READABLE | Interest::WRITABLE,
        )?;
        sh.fds.insert(
            fd,
            FdEntry {
                handler: Some(handler),
                want_in: false,
                want_out: false,
                internal,
            },
        );
        if !internal {
            sh.nuser += 1;
        }
        Ok(())
    }

    /// Adjust readability/writability interest for a registered fd.
    pub fn set_events(&self, fd: RawFd, want_in: bool, want_out: bool) -> Result<(), ReactorError> {
        let mut sh = self.shared.borrow_mut();
        let entry = sh.fds.get_mut(&fd).ok_or(ReactorError::UnknownFd(fd))?;
        let poke_in = want_in && !entry.want_in;
        let poke_out = want_out && !entry.want_out;
        entry.want_in = want_in;
        entry.want_out = want_out;
        if poke_in || poke_out {
            sh.pokes.push_back((fd, poke_in, poke_out));
        }
        Ok(())
    }

    /// Remove a registered fd, optionally closing it. Idempotent. The
    /// fd stops receiving events immediately; its handler is kept alive
    /// until the current pass finishes.
    pub fn remove(&self, fd: RawFd, close_fd: bool) {
        let mut sh = self.shared.borrow_mut();
        let Some(entry) = sh.fds.remove(&fd) else {
            return;
        };
        if !entry.internal {
            sh.nuser -= 1;
        }
        if let Some(handler) = entry.handler {
            sh.retired.push(handler);
        }
        if let Err(e) = sh.registry.deregister(&mut SourceFd(&fd)) {
            tracing::warn!(fd, error = %e, "deregistering fd from poll failed");
        }
        if close_fd {
            if let Err(e) = nix::unistd::close(fd) {
                tracing::warn!(fd, error = %e, "closing fd failed");
            }
        }
    }

    /// Enqueue a callback to run as soon as possible on the loop, in
    /// FIFO order and before the next fd event. Intended use: an object
    /// that must delete itself from inside one of its own handlers
    /// schedules the teardown here instead of doing it in place.
    pub fn queue(&self, callback: impl FnOnce() + 'static) {
        self.shared.borrow_mut().queue.push_back(Box::new(callback));
    }

    /// Schedule a one-shot timer firing no earlier than `delay` from
    /// now (monotonic clock). Weak timers never prevent `process` from
    /// returning: they are dropped when no other work remains.
    pub fn schedule(
        &self,
        callback: impl FnOnce() + 'static,
        delay: Duration,
        weak: bool,
    ) -> TimerHandle {
        let due = Instant::now() + delay;
        self.shared
            .borrow_mut()
            .timers
            .insert(Box::new(callback), due, weak)
    }

    /// Cancel a pending timer. Errors if the handle is unknown or if
    /// the timer's own callback is currently running.
    pub fn cancel(&self, handle: TimerHandle) -> Result<(), ReactorError> {
        self.shared.borrow_mut().timers.cancel(handle)
    }

    /// Make the loop return as soon as possible; in-flight handlers
    /// always complete.
    pub fn stop(&self) {
        self.shared.borrow_mut().stopped = true;
    }
}

/// Owner of the event loop. See the module docs for the pass structure.
pub struct Reactor {
    poll: Poll,
    events: Events,
    handle: ReactorHandle,
    signals: HashMap<i32, SignalEntry>,
}

enum Gate {
    In,
    Out,
    Always,
}

impl Reactor {
    pub fn new() -> Result<Self, ReactorError> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            handle: ReactorHandle {
                shared: Rc::new(RefCell::new(Shared {
                    registry,
                    fds: HashMap::new(),
                    nuser: 0,
                    queue: VecDeque::new(),
                    pokes: VecDeque::new(),
                    timers: TimerSet::default(),
                    retired: Vec::new(),
                    stopped: false,
                })),
            },
            signals: HashMap::new(),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Register a callback for a POSIX signal. Delivery is deferred to
    /// loop iterations: the OS handler only writes to a self-pipe.
    pub fn setup_signal_handler(
        &mut self,
        signo: i32,
        mut callback: impl FnMut(i32) + 'static,
    ) -> Result<(), ReactorError> {
        if self.signals.contains_key(&signo) {
            return Err(ReactorError::SignalExists(signo));
        }
        let entry = SignalEntry::register(signo)?;
        let read_fd = entry.read_fd.as_raw_fd();
        self.handle.add_entry(
            read_fd,
            Box::new(move |event| {
                if event != IoEvent::In {
                    return;
                }
                let mut buf = [0u8; 64];
                loop {
                    match nix::unistd::read(read_fd, &mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            for _ in 0..n {
                                callback(signo);
                            }
                        }
                        Err(Errno::EAGAIN) => break,
                        Err(Errno::EINTR) => continue,
                        Err(e) => {
                            tracing::warn!(signo, error = %e, "reading signal pipe failed");
                            break;
                        }
                    }
                }
            }),
            true,
        )?;
        self.handle.set_events(read_fd, true, false)?;
        self.signals.insert(signo, entry);
        Ok(())
    }

    /// Run the loop. `npasses < 0` runs until stopped or out of work;
    /// `npasses == 0` makes a single non-blocking pass; `npasses > 0`
    /// makes exactly that many blocking passes.
    pub fn process(&mut self, npasses: i32) -> Result<(), ReactorError> {
        self.handle.shared.borrow_mut().stopped = false;
        let total = match npasses {
            n if n < 0 => None,
            0 => Some(1),
            n => Some(n),
        };
        let nonblocking = npasses == 0;
        let mut ipass = 0;
        loop {
            if self.stopped() {
                break;
            }
            if let Some(total) = total {
                if ipass >= total {
                    break;
                }
            }
            ipass += 1;

            self.drain_deferred()?;
            if self.stopped() {
                break;
            }

            // Ground state: nothing left but weak timers.
            {
                let mut sh = self.handle.shared.borrow_mut();
                if sh.nuser == 0
                    && sh.timers.all_weak()
                    && sh.queue.is_empty()
                    && sh.pokes.is_empty()
                {
                    tracing::debug!("no registered i/o left, leaving the loop");
                    sh.timers.drain_all();
                    break;
                }
            }

            let timeout = if nonblocking {
                Some(Duration::ZERO)
            } else {
                self.handle
                    .shared
                    .borrow()
                    .timers
                    .next_due()
                    .map(|due| due.saturating_duration_since(Instant::now()))
            };
            let timer_budget = self.handle.shared.borrow().timers.len();

            loop {
                match self.poll.poll(&mut self.events, timeout) {
                    Ok(()) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let ready: Vec<(RawFd, bool, bool, Option<i32>)> = self
                .events
                .iter()
                .map(|event| {
                    let fd = event.token().0 as RawFd;
                    // Precise socket errors surface through read()/write()
                    // in the handler; here we only classify the readiness.
                    let err = if event.is_error() {
                        Some(libc::ECONNABORTED)
                    } else if event.is_read_closed() || event.is_write_closed() {
                        Some(libc::ECONNRESET)
                    } else {
                        None
                    };
                    (fd, event.is_readable(), event.is_writable(), err)
                })
                .collect();

            for (fd, readable, writable, err) in ready {
                if self.stopped() {
                    break;
                }
                self.dispatch_fd(fd, readable, writable, err)?;
            }

            self.fire_timers(timer_budget)?;
            self.handle.shared.borrow_mut().retired.clear();
        }
        Ok(())
    }

    /// `process(-1)`.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        self.process(-1)
    }

    fn stopped(&self) -> bool {
        self.handle.shared.borrow().stopped
    }

    fn dispatch_fd(
        &mut self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        err: Option<i32>,
    ) -> Result<(), ReactorError> {
        if readable {
            self.call_fd_handler(fd, IoEvent::In, Gate::In);
            self.drain_deferred()?;
        }
        if writable && !self.stopped() {
            self.call_fd_handler(fd, IoEvent::Out, Gate::Out);
            self.drain_deferred()?;
        }
        if let Some(code) = err {
            if self.stopped() {
                return Ok(());
            }
            self.call_fd_handler(fd, IoEvent::Error(code), Gate::Always);
            if self.handle.shared.borrow().fds.contains_key(&fd) {
                tracing::error!(fd, "error handler did not remove its fd");
            }
        }
        Ok(())
    }

    /// Invoke the handler of `fd` for one event, skipping it entirely
    /// if the fd was removed earlier in the batch or the event kind is
    /// not wanted. The handler is taken out of its slot for the call so
    /// it can freely re-register through its own handle.
    fn call_fd_handler(&mut self, fd: RawFd, event: IoEvent, gate: Gate) {
        let handler = {
            let mut sh = self.handle.shared.borrow_mut();
            match sh.fds.get_mut(&fd) {
                None => return,
                Some(entry) => {
                    let wanted = match gate {
                        Gate::In => entry.want_in,
                        Gate::Out => entry.want_out,
                        Gate::Always => true,
                    };
                    if !wanted {
                        return;
                    }
                    entry.handler.take()
                }
            }
        };
        let Some(mut handler) = handler else {
            return;
        };
        handler(event);
        let mut sh = self.handle.shared.borrow_mut();
        let mut handler = Some(handler);
        if let Some(entry) = sh.fds.get_mut(&fd) {
            if entry.handler.is_none() {
                entry.handler = handler.take();
            }
        }
        if let Some(handler) = handler {
            sh.retired.push(handler);
        }
    }

    /// Drain queued callbacks (FIFO, bounded against runaway
    /// re-queueing) and synthetic readiness checks until both are
    /// empty.
    fn drain_deferred(&mut self) -> Result<(), ReactorError> {
        loop {
            if self.stopped() {
                return Ok(());
            }
            let ran_callbacks = self.run_queued()?;
            let ran_pokes = self.run_pokes();
            if !ran_callbacks && !ran_pokes {
                return Ok(());
            }
        }
    }

    fn run_queued(&mut self) -> Result<bool, ReactorError> {
        let cap = self.handle.shared.borrow().queue.len() * 10;
        let mut n = 0usize;
        loop {
            if self.stopped() {
                return Ok(n > 0);
            }
            let callback = self.handle.shared.borrow_mut().queue.pop_front();
            let Some(callback) = callback else {
                return Ok(n > 0);
            };
            callback();
            n += 1;
            if n > cap {
                return Err(ReactorError::RunawayCallbacks);
            }
        }
    }

    fn run_pokes(&mut self) -> bool {
        let mut ran = false;
        loop {
            if self.stopped() {
                return ran;
            }
            let poke = self.handle.shared.borrow_mut().pokes.pop_front();
            let Some((fd, poke_in, poke_out)) = poke else {
                return ran;
            };
            ran = true;
            if poke_in {
                self.call_fd_handler(fd, IoEvent::In, Gate::In);
            }
            if poke_out {
                self.call_fd_handler(fd, IoEvent::Out, Gate::Out);
            }
        }
    }

    /// Fire expired timers, at most `budget` of them (the count pending
    /// before the wait), so handlers scheduling immediate timers cannot
    /// starve the loop.
    fn fire_timers(&mut self, budget: usize) -> Result<(), ReactorError> {
        let mut fired = 0;
        while fired < budget {
            if self.stopped() {
                break;
            }
            let now = Instant::now();
            let due = self.handle.shared.borrow_mut().timers.pop_due(now);
            let Some((handle, callback)) = due else {
                break;
            };
            self.handle
                .shared
                .borrow_mut()
                .timers
                .set_firing(Some(handle));
            callback();
            self.handle.shared.borrow_mut().timers.set_firing(None);
            fired += 1;
            self.drain_deferred()?;
        }
        Ok(())
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), ReactorError> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
