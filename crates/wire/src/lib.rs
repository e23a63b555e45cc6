// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fw-wire: framed, typed messages over a byte stream.
//!
//! A [`Channel`] owns one connected non-blocking descriptor and
//! exchanges length-prefixed frames: an 8-byte little-endian total size
//! (header included), a length-prefixed kind tag, and the message body.
//! Decoding is driven by a [`Registry`] built explicitly at process
//! start, mapping each kind tag to its body decoder.

mod channel;
mod error;
mod frame;
mod net;

pub use channel::Channel;
pub use error::WireError;
pub use frame::{
    encode_frame, get_f32, get_i64, get_str, get_u32, get_u64, put_str, Payload, Registry,
    HEADER_LEN,
};
pub use net::{connect_to, socketpair_stream, TcpAcceptor};

/// Default per-channel bound on received message size (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;
