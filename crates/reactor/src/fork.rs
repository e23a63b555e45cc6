// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level fork hooks.
//!
//! Components that hold per-process resources (log files, reactors)
//! register a child-side callback in advance; whoever performs the
//! `fork()` runs [`run_child_hooks`] in the child before doing anything
//! else. Typical use: re-suffix the log file by the child's PID.

use parking_lot::Mutex;

type Hook = Box<dyn Fn() + Send>;

static CHILD_HOOKS: Mutex<Vec<Hook>> = Mutex::new(Vec::new());

/// Register a callback to run in the child after a `fork()`.
pub fn on_fork_child(hook: impl Fn() + Send + 'static) {
    CHILD_HOOKS.lock().push(Box::new(hook));
}

/// Run all registered child hooks, in registration order.
///
/// Must be called in the child process, before any I/O on inherited
/// descriptors.
pub fn run_child_hooks() {
    for hook in CHILD_HOOKS.lock().iter() {
        hook();
    }
}
