// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative state graph.
//!
//! States are named by string and interned to ids. Transitions are
//! labelled by message kind; at most one transition may leave a state
//! for a given kind, which makes [`StateGraph::next`] deterministic.
//! Restriction sets name groups of transitions that can be disabled
//! together while active (e.g. stop handing out work when the pool of
//! event ranges is empty).
//!
//! The graph is immutable once handed to a manager; builders keep a
//! `&mut` only during setup.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::SwarmError;

/// Message kind tag, shared with the wire layer.
pub type Kind = &'static str;

/// Interned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

/// Interned restriction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RestrictionSetId(usize);

pub struct StateGraph {
    states: Vec<String>,
    states_by_name: HashMap<String, StateId>,
    transitions: HashMap<(StateId, Kind), StateId>,
    /// Outgoing edges in insertion order, for deterministic path
    /// selection.
    edges_from: Vec<Vec<(Kind, StateId)>>,
    restriction_sets: Vec<(String, HashSet<(StateId, StateId)>)>,
    sets_by_name: HashMap<String, RestrictionSetId>,
}

impl StateGraph {
    /// A fresh graph seeded with the `start`, `stop` and `failed`
    /// states every protocol shares.
    pub fn new() -> Self {
        let mut graph = Self {
            states: Vec::new(),
            states_by_name: HashMap::new(),
            transitions: HashMap::new(),
            edges_from: Vec::new(),
            restriction_sets: Vec::new(),
            sets_by_name: HashMap::new(),
        };
        for name in ["start", "stop", "failed"] {
            // fresh graph, duplicates are impossible
            let _ = graph.add_state(name);
        }
        graph
    }

    pub fn add_state(&mut self, name: &str) -> Result<StateId, SwarmError> {
        if self.states_by_name.contains_key(name) {
            return Err(SwarmError::DuplicateState(name.to_string()));
        }
        let id = StateId(self.states.len());
        self.states.push(name.to_string());
        self.states_by_name.insert(name.to_string(), id);
        self.edges_from.push(Vec::new());
        Ok(id)
    }

    pub fn state(&self, name: &str) -> Result<StateId, SwarmError> {
        self.states_by_name
            .get(name)
            .copied()
            .ok_or_else(|| SwarmError::UnknownState(name.to_string()))
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.states[id.0]
    }

    pub fn add_transition(
        &mut self,
        kind: Kind,
        from: StateId,
        to: StateId,
    ) -> Result<(), SwarmError> {
        if self.transitions.contains_key(&(from, kind)) {
            return Err(SwarmError::DuplicateTransition {
                from: self.name(from).to_string(),
                kind,
            });
        }
        self.transitions.insert((from, kind), to);
        self.edges_from[from.0].push((kind, to));
        Ok(())
    }

    pub fn add_restriction_set(&mut self, name: &str) -> Result<RestrictionSetId, SwarmError> {
        if self.sets_by_name.contains_key(name) {
            return Err(SwarmError::DuplicateRestrictionSet(name.to_string()));
        }
        let id = RestrictionSetId(self.restriction_sets.len());
        self.restriction_sets
            .push((name.to_string(), HashSet::new()));
        self.sets_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add the transition `from → to` to a restriction set. The
    /// transition must exist.
    pub fn add_restriction(
        &mut self,
        set: RestrictionSetId,
        from: StateId,
        to: StateId,
    ) -> Result<(), SwarmError> {
        if !self.edges_from[from.0].iter().any(|&(_, t)| t == to) {
            return Err(SwarmError::NoSuchTransition {
                from: self.name(from).to_string(),
                to: self.name(to).to_string(),
            });
        }
        self.restriction_sets[set.0].1.insert((from, to));
        Ok(())
    }

    pub fn restriction_set(&self, name: &str) -> Result<RestrictionSetId, SwarmError> {
        self.sets_by_name
            .get(name)
            .copied()
            .ok_or_else(|| SwarmError::UnknownRestrictionSet(name.to_string()))
    }

    pub fn restriction_set_name(&self, id: RestrictionSetId) -> &str {
        &self.restriction_sets[id.0].0
    }

    /// The state reached by sending `kind` in `from`, if legal.
    pub fn next(&self, from: StateId, kind: &str) -> Option<StateId> {
        // Kind tags are 'static on the write path, but lookups may come
        // from decoded messages, so compare by value.
        self.edges_from[from.0]
            .iter()
            .find(|&&(k, _)| k == kind)
            .map(|&(_, to)| to)
    }

    fn edge_restricted(
        &self,
        from: StateId,
        to: StateId,
        active: &HashSet<RestrictionSetId>,
    ) -> bool {
        active
            .iter()
            .any(|set| self.restriction_sets[set.0].1.contains(&(from, to)))
    }

    /// First edge of a shortest non-empty path from `from` to `target`
    /// that uses no restricted transition. With `from == target` this
    /// is the shortest cycle back to the target: a peer sitting at the
    /// target keeps taking its self-loop (that is how `process` keeps
    /// handing out work) and only idles when every such path is
    /// restricted away. `None` when the target is unreachable.
    pub fn next_toward(
        &self,
        from: StateId,
        target: StateId,
        active: &HashSet<RestrictionSetId>,
    ) -> Option<(Kind, StateId)> {
        let mut first_edge: Vec<Option<(Kind, StateId)>> = vec![None; self.states.len()];
        let mut seen = vec![false; self.states.len()];
        let mut queue = VecDeque::new();
        seen[from.0] = true;
        queue.push_back(from);
        while let Some(state) = queue.pop_front() {
            for &(kind, to) in &self.edges_from[state.0] {
                if self.edge_restricted(state, to, active) {
                    continue;
                }
                let edge = if state == from {
                    Some((kind, to))
                } else {
                    first_edge[state.0]
                };
                if to == target {
                    return edge;
                }
                if seen[to.0] {
                    continue;
                }
                seen[to.0] = true;
                first_edge[to.0] = edge;
                queue.push_back(to);
            }
        }
        None
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
