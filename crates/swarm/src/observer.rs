// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress hooks for swarm watchers.

use std::collections::HashSet;

use crate::{RestrictionSetId, StateId, WorkerId};

/// Notifications about the swarm's progress, for reporting and
/// bookkeeping. All methods default to no-ops.
///
/// Observers are invoked from inside the manager: they must not call
/// back into it.
pub trait SwarmObserver {
    /// A peer moved between states. `from` is `None` for a freshly
    /// added peer entering `start`.
    fn on_state_transition(&mut self, _worker: WorkerId, _from: Option<StateId>, _to: StateId) {}
    /// A peer became idle (reached the target, or no work available).
    /// Fired once per transition into idleness.
    fn on_idle(&mut self, _worker: WorkerId, _state: StateId) {}
    fn on_target_changed(&mut self, _target: StateId) {}
    fn on_restrictions_changed(&mut self, _active: &HashSet<RestrictionSetId>) {}
}
