// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fw-swarm: state-machine-driven request/response over channels.
//!
//! A [`StateGraph`] declares which message kinds may be sent to a peer
//! in which state. The master-side [`SwarmManager`] owns a fleet of
//! peers and drives each one toward a target state, asking its
//! [`SwarmDriver`] to fabricate every request and reporting every
//! response back to it. The worker-side [`WorkerManager`] answers
//! requests with a [`WorkerHandler`] and advances deterministically
//! along the same graph.

mod error;
mod graph;
mod observer;
mod swarm;
mod worker_mgr;

pub use error::SwarmError;
pub use graph::{Kind, RestrictionSetId, StateGraph, StateId};
pub use observer::SwarmObserver;
pub use swarm::{ProtocolMessage, SwarmCtx, SwarmDriver, SwarmManager, WorkerId};
pub use worker_mgr::{WorkerHandler, WorkerManager};
