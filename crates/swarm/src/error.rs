// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the swarm layer

use fw_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("state '{0}' already exists")]
    DuplicateState(String),
    #[error("unknown state '{0}'")]
    UnknownState(String),
    #[error("transition for kind '{kind}' out of state '{from}' already exists")]
    DuplicateTransition { from: String, kind: &'static str },
    #[error("no transition from '{from}' to '{to}' to restrict")]
    NoSuchTransition { from: String, to: String },
    #[error("restriction set '{0}' already exists")]
    DuplicateRestrictionSet(String),
    #[error("unknown restriction set '{0}'")]
    UnknownRestrictionSet(String),
    #[error("unknown worker {0}")]
    UnknownWorker(u32),
    #[error("message kind '{kind}' is not legal in state '{state}'")]
    IllegalMessage { state: String, kind: String },
    #[error("response arrived with no request in flight")]
    UnexpectedResponse,
    #[error("request handler failed: {0}")]
    Handler(String),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
