// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the job layer

use fw_reactor::ReactorError;
use fw_swarm::SwarmError;
use fw_wire::WireError;
use thiserror::Error;

use crate::ranges::RangeError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("config error: {0}")]
    Config(String),
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("bad file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("input files do not match: master fingerprint {master:#018x}, worker fingerprint {worker:#018x}")]
    FingerprintMismatch { master: u64, worker: u64 },
    #[error("no dataset active")]
    NoDataset,
    #[error("no input file active")]
    NoFile,
    #[error("worker is not configured yet")]
    NotConfigured,
    #[error("record tree: {0}")]
    Tree(String),
    #[error("job did not complete successfully")]
    Incomplete,
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

// Lets coordinator and worker code written against JobError flow
// through the swarm's driver/handler traits with plain `?`.
impl From<JobError> for SwarmError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Swarm(inner) => inner,
            other => SwarmError::Handler(other.to_string()),
        }
    }
}
