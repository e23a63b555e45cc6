// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot timer bookkeeping for the reactor.
//!
//! Timers are ordered by due time and identified by an opaque handle.
//! A timer is either *strong* or *weak*: weak timers never keep the
//! loop alive on their own and are dropped when the reactor runs out of
//! other work.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::ReactorError;

/// Opaque handle returned by [`crate::ReactorHandle::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

pub(crate) type TimerCallback = Box<dyn FnOnce()>;

struct TimerEntry {
    callback: TimerCallback,
    weak: bool,
}

/// Set of pending one-shot timers, indexed both by due time (for the
/// poll deadline) and by handle (for cancellation).
#[derive(Default)]
pub(crate) struct TimerSet {
    // (due, handle) keeps entries with equal due times distinct
    due: BTreeMap<(Instant, u64), TimerEntry>,
    by_handle: HashMap<u64, Instant>,
    next_handle: u64,
    nweak: usize,
    firing: Option<u64>,
}

impl TimerSet {
    pub fn insert(&mut self, callback: TimerCallback, due: Instant, weak: bool) -> TimerHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.due.insert((due, handle), TimerEntry { callback, weak });
        self.by_handle.insert(handle, due);
        if weak {
            self.nweak += 1;
        }
        TimerHandle(handle)
    }

    /// Cancel a pending timer. A timer cancelling itself from its own
    /// callback is a contract violation.
    pub fn cancel(&mut self, handle: TimerHandle) -> Result<(), ReactorError> {
        if self.firing == Some(handle.0) {
            return Err(ReactorError::TimerSelfCancel);
        }
        let due = self
            .by_handle
            .remove(&handle.0)
            .ok_or(ReactorError::UnknownTimer)?;
        if let Some(entry) = self.due.remove(&(due, handle.0)) {
            if entry.weak {
                self.nweak -= 1;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    /// True when every pending timer is weak (including the empty set).
    pub fn all_weak(&self) -> bool {
        self.due.len() == self.nweak
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.due.keys().next().map(|(due, _)| *due)
    }

    /// Remove and return the earliest timer that is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, TimerCallback)> {
        let (due, handle) = *self.due.keys().next()?;
        if due > now {
            return None;
        }
        let entry = self.due.remove(&(due, handle))?;
        self.by_handle.remove(&handle);
        if entry.weak {
            self.nweak -= 1;
        }
        Some((TimerHandle(handle), entry.callback))
    }

    /// Drop every pending timer without firing it. Used when the loop
    /// reaches its ground state and only weak timers remain.
    pub fn drain_all(&mut self) {
        self.due.clear();
        self.by_handle.clear();
        self.nweak = 0;
    }

    pub fn set_firing(&mut self, handle: Option<TimerHandle>) {
        self.firing = handle.map(|h| h.0);
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
