// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fw-reactor: single-threaded I/O event loop.
//!
//! One `Reactor` per process multiplexes non-blocking file descriptors,
//! monotonic timers and POSIX signals on a single thread. Handlers are
//! plain closures; no two handlers ever run at the same time. Cloneable
//! [`ReactorHandle`]s let handlers register further work (fds, timers,
//! deferred callbacks) without ever touching the loop itself.

mod error;
mod fork;
mod reactor;
mod signals;
mod timers;

pub use error::ReactorError;
pub use fork::{on_fork_child, run_child_hooks};
pub use reactor::{IoEvent, Reactor, ReactorHandle};
pub use timers::TimerHandle;
