// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame layout and the kind registry.
//!
//! Wire layout of one message:
//!
//! ```text
//! u64 LE   total size, including these 8 bytes
//! u32 LE   kind tag length, then that many bytes of UTF-8
//! ...      message body (kind-specific)
//! ```
//!
//! Numeric primitives are little-endian; strings are u32-length
//! prefixed. The deployment is assumed homogeneous.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Size of the frame header.
pub const HEADER_LEN: usize = 8;

/// A message type that can be framed: it names its kind and writes its
/// body. Decoding goes through a [`Registry`] keyed by the kind tag.
pub trait Payload: 'static {
    fn kind(&self) -> &'static str;
    fn encode_body(&self, out: &mut BytesMut);
}

type Decoder<M> = fn(&mut Bytes) -> Result<M, WireError>;

/// Maps kind tags to body decoders. Built once, explicitly, at process
/// start; shared read-only by every channel of the process.
pub struct Registry<M> {
    decoders: HashMap<&'static str, Decoder<M>>,
}

impl<M: Payload> Registry<M> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &'static str, decoder: Decoder<M>) -> Result<(), WireError> {
        if self.decoders.insert(kind, decoder).is_some() {
            return Err(WireError::DuplicateKind(kind));
        }
        Ok(())
    }

    /// Decode the tagged part of a frame (everything after the size
    /// header).
    pub fn decode(&self, mut tagged: Bytes) -> Result<M, WireError> {
        let kind = get_str(&mut tagged)?;
        let decoder = self
            .decoders
            .get(kind.as_str())
            .ok_or(WireError::UnknownKind(kind))?;
        decoder(&mut tagged)
    }
}

impl<M: Payload> Default for Registry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialise a full frame, header included.
pub fn encode_frame<M: Payload>(msg: &M) -> BytesMut {
    let mut out = BytesMut::with_capacity(64);
    out.put_u64_le(0); // patched below
    put_str(&mut out, msg.kind());
    msg.encode_body(&mut out);
    let size = out.len() as u64;
    out[..HEADER_LEN].copy_from_slice(&size.to_le_bytes());
    out
}

pub fn put_str(out: &mut BytesMut, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}

pub fn get_str(input: &mut Bytes) -> Result<String, WireError> {
    let len = get_u32(input)? as usize;
    if input.remaining() < len {
        return Err(WireError::Malformed("truncated string"));
    }
    let raw = input.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::Malformed("string is not UTF-8"))
}

pub fn get_u32(input: &mut Bytes) -> Result<u32, WireError> {
    if input.remaining() < 4 {
        return Err(WireError::Malformed("truncated u32"));
    }
    Ok(input.get_u32_le())
}

pub fn get_u64(input: &mut Bytes) -> Result<u64, WireError> {
    if input.remaining() < 8 {
        return Err(WireError::Malformed("truncated u64"));
    }
    Ok(input.get_u64_le())
}

pub fn get_i64(input: &mut Bytes) -> Result<i64, WireError> {
    if input.remaining() < 8 {
        return Err(WireError::Malformed("truncated i64"));
    }
    Ok(input.get_i64_le())
}

pub fn get_f32(input: &mut Bytes) -> Result<f32, WireError> {
    if input.remaining() < 4 {
        return Err(WireError::Malformed("truncated f32"));
    }
    Ok(input.get_f32_le())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
