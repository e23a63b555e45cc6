// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the reactor

use std::os::fd::RawFd;
use thiserror::Error;

/// Errors raised by [`crate::Reactor`] and [`crate::ReactorHandle`].
///
/// Most variants are contract violations: they indicate a bug in the
/// calling code, not a runtime condition to recover from.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("fd {0} is already registered")]
    FdExists(RawFd),
    #[error("fd {0} is not registered")]
    UnknownFd(RawFd),
    #[error("no such timer handle")]
    UnknownTimer,
    #[error("a timer callback tried to cancel itself")]
    TimerSelfCancel,
    #[error("signal {0} already has a handler")]
    SignalExists(i32),
    #[error("too many nested deferred callbacks")]
    RunawayCallbacks,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("system call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}
