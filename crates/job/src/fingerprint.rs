// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dataset input fingerprint.
//!
//! Master and worker read the config file independently; every
//! `Process` request carries the master's fingerprint of the dataset's
//! ordered file list so the worker can assert both sides agree on the
//! inputs. The fingerprint is the first 8 bytes (little-endian) of a
//! SHA-256 over the length-prefixed paths, so it is stable across runs
//! and sensitive to ordering.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

pub fn files_fingerprint(files: &[PathBuf]) -> u64 {
    let mut hasher = Sha256::new();
    for file in files {
        let path = file.to_string_lossy();
        hasher.update((path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
    }
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}
