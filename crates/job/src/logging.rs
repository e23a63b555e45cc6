// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging setup.
//!
//! Writes are synchronous so forked workers inherit nothing that could
//! deadlock. The file writer keys the file name by the current PID on
//! every write: after a `fork()` the child's log lines automatically
//! land in its own `<prefix>-<pid>.log` without re-initialising the
//! subscriber.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr (master and worker processes).
pub fn init_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .try_init();
}

/// Log to `<dir>/<prefix>-<pid>.log` (local mode, fork-safe).
pub fn init_per_process_file(dir: &Path, prefix: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(PidSuffixedWriter {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
        })
        .try_init();
}

/// Opens the per-PID log file on every write, so the writer needs no
/// fork handling of its own: in the child, `std::process::id()` simply
/// yields the new name.
struct PidSuffixedWriter {
    dir: PathBuf,
    prefix: String,
}

impl<'a> MakeWriter<'a> for PidSuffixedWriter {
    type Writer = Box<dyn Write>;

    fn make_writer(&'a self) -> Self::Writer {
        let path = self
            .dir
            .join(format!("{}-{}.log", self.prefix, std::process::id()));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}
