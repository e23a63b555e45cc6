// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the wire layer

use fw_reactor::ReactorError;
use thiserror::Error;

/// Errors raised by the codec and channel.
///
/// I/O failures on an open channel are *not* reported through this
/// type: they surface as a POSIX errno through the channel's error
/// callback and always close the channel.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),
    #[error("message kind '{0}' registered twice")]
    DuplicateKind(&'static str),
    #[error("write called while another write is active")]
    WriteBusy,
    #[error("a read handler is already installed")]
    ReadBusy,
    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}
