// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job protocol's messages.
//!
//! See [`crate::stategraph`] for how they relate to the overall
//! structure. `Process` is answered with `ProcessResponse` and `Merge`
//! echoes itself back (so the master learns which worker's file
//! survived); everything else is answered with the bare `Ack`.

use bytes::{BufMut, BytesMut};
use fw_swarm::ProtocolMessage;
use fw_wire::{get_f32, get_str, get_u32, get_u64, put_str, Payload, Registry, WireError};

/// Kind tags on the wire.
pub mod kind {
    pub const CONFIGURE: &str = "config";
    pub const PROCESS: &str = "process";
    pub const PROCESS_RESPONSE: &str = "procresp";
    pub const CLOSE: &str = "close";
    pub const MERGE: &str = "merge";
    pub const STOP: &str = "stop";
    pub const ACK: &str = "ack";
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Bootstrap the worker's analysis runtime.
    Configure {
        config_path: String,
        worker_index: u32,
    },
    /// Process the half-open event range [first, last) of one file.
    Process {
        dataset_index: u32,
        file_index: u32,
        files_fingerprint: u64,
        first: u64,
        last: u64,
    },
    /// Answer to `Process`: the file's actual size (discovered on first
    /// contact) plus statistics.
    ProcessResponse {
        file_nevents: u64,
        nbytes_read: u64,
        real_seconds: f32,
        cpu_seconds: f32,
    },
    /// Finalise the per-worker output file of the dataset.
    Close {
        dataset_index: u32,
        files_fingerprint: u64,
    },
    /// Merge worker_b's output file into worker_a's. Echoed back as the
    /// response; the echo's `worker_a` is the surviving file.
    Merge {
        dataset_index: u32,
        worker_a: u32,
        worker_b: u32,
    },
    /// Terminate cleanly.
    Stop,
    /// Bare acknowledgement for requests without a domain response.
    Ack,
}

impl Payload for Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::Configure { .. } => kind::CONFIGURE,
            Message::Process { .. } => kind::PROCESS,
            Message::ProcessResponse { .. } => kind::PROCESS_RESPONSE,
            Message::Close { .. } => kind::CLOSE,
            Message::Merge { .. } => kind::MERGE,
            Message::Stop => kind::STOP,
            Message::Ack => kind::ACK,
        }
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            Message::Configure {
                config_path,
                worker_index,
            } => {
                put_str(out, config_path);
                out.put_u32_le(*worker_index);
            }
            Message::Process {
                dataset_index,
                file_index,
                files_fingerprint,
                first,
                last,
            } => {
                out.put_u32_le(*dataset_index);
                out.put_u32_le(*file_index);
                out.put_u64_le(*files_fingerprint);
                out.put_u64_le(*first);
                out.put_u64_le(*last);
            }
            Message::ProcessResponse {
                file_nevents,
                nbytes_read,
                real_seconds,
                cpu_seconds,
            } => {
                out.put_u64_le(*file_nevents);
                out.put_u64_le(*nbytes_read);
                out.put_f32_le(*real_seconds);
                out.put_f32_le(*cpu_seconds);
            }
            Message::Close {
                dataset_index,
                files_fingerprint,
            } => {
                out.put_u32_le(*dataset_index);
                out.put_u64_le(*files_fingerprint);
            }
            Message::Merge {
                dataset_index,
                worker_a,
                worker_b,
            } => {
                out.put_u32_le(*dataset_index);
                out.put_u32_le(*worker_a);
                out.put_u32_le(*worker_b);
            }
            Message::Stop | Message::Ack => {}
        }
    }
}

impl ProtocolMessage for Message {
    fn ack() -> Self {
        Message::Ack
    }

    fn is_ack(&self) -> bool {
        matches!(self, Message::Ack)
    }
}

/// Build the registry with every kind of the job protocol. Call once at
/// process start and share it with every channel.
pub fn registry() -> Result<Registry<Message>, WireError> {
    let mut reg = Registry::new();
    reg.register(kind::CONFIGURE, |b| {
        Ok(Message::Configure {
            config_path: get_str(b)?,
            worker_index: get_u32(b)?,
        })
    })?;
    reg.register(kind::PROCESS, |b| {
        Ok(Message::Process {
            dataset_index: get_u32(b)?,
            file_index: get_u32(b)?,
            files_fingerprint: get_u64(b)?,
            first: get_u64(b)?,
            last: get_u64(b)?,
        })
    })?;
    reg.register(kind::PROCESS_RESPONSE, |b| {
        Ok(Message::ProcessResponse {
            file_nevents: get_u64(b)?,
            nbytes_read: get_u64(b)?,
            real_seconds: get_f32(b)?,
            cpu_seconds: get_f32(b)?,
        })
    })?;
    reg.register(kind::CLOSE, |b| {
        Ok(Message::Close {
            dataset_index: get_u32(b)?,
            files_fingerprint: get_u64(b)?,
        })
    })?;
    reg.register(kind::MERGE, |b| {
        Ok(Message::Merge {
            dataset_index: get_u32(b)?,
            worker_a: get_u32(b)?,
            worker_b: get_u32(b)?,
        })
    })?;
    reg.register(kind::STOP, |_| Ok(Message::Stop))?;
    reg.register(kind::ACK, |_| Ok(Message::Ack))?;
    Ok(reg)
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
