// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-pipe plumbing for deferred signal delivery.
//!
//! The OS signal handler (installed through `signal-hook`) only writes
//! one byte to a pipe; the reactor watches the read end and invokes the
//! user callback from the loop, never from interrupt context.

use std::os::fd::OwnedFd;

use nix::fcntl::OFlag;
use signal_hook::SigId;

use crate::ReactorError;

pub(crate) struct SignalEntry {
    pub read_fd: OwnedFd,
    sig_id: SigId,
}

impl SignalEntry {
    /// Install the async-signal-safe half: a pipe whose write end is
    /// registered with `signal-hook` for `signo`.
    pub fn register(signo: i32) -> Result<Self, ReactorError> {
        let (read_fd, write_fd) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        let sig_id = signal_hook::low_level::pipe::register(signo, write_fd)?;
        Ok(Self { read_fd, sig_id })
    }
}

impl Drop for SignalEntry {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.sig_id);
    }
}
