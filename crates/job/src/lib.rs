// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fw-job: the distributed event-processing job.
//!
//! The master divides each dataset's files into event ranges, farms
//! them out over the swarm, has the workers close and merge their
//! per-worker output files, and renames the surviving file into the
//! final per-dataset artifact. Workers run the analysis pipeline over
//! the ranges they are handed.

pub mod analysis;
pub mod config;
mod error;
pub mod fingerprint;
pub mod local;
pub mod logging;
pub mod master;
pub mod messages;
pub mod ranges;
pub mod stategraph;
pub mod tree;
pub mod worker;

pub use config::{Dataset, JobConfig, MergeMode, ModuleSpec, Options};
pub use error::JobError;
pub use local::local_run;
pub use master::{Master, MasterObserver, ProgressReporter};
pub use messages::Message;
pub use ranges::{EventRange, EventRangeManager, IndexRanges, RangeError};
pub use worker::Worker;
