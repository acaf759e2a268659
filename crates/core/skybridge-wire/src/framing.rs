//! Transport framing: a 4-byte big-endian length prefix around opaque
//! payloads.
//!
//! The transport below the session core delivers an ordered byte stream;
//! every payload on the wire is prefixed by its length. Frames larger than
//! [`MAX_FRAME_LEN`] close the connection.

use crate::error::{Result, WireError};
use bytes::{Buf, BytesMut};

/// Maximum frame size accepted on the wire.
pub const MAX_FRAME_LEN: usize = 2_000_000;

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Encodes a payload into a length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len: payload.len(), max: MAX_FRAME_LEN });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental frame reassembler.
///
/// Bytes arrive from the transport in arbitrary chunks; `push` buffers them
/// and `next_frame` yields complete payloads as they become available.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Appends bytes received from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete frame payload, if one is buffered.
    ///
    /// An oversize length prefix is a protocol violation; the caller must
    /// close the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge { len, max: MAX_FRAME_LEN });
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len).to_vec();
        Ok(Some(payload))
    }

    /// Bytes currently buffered, including any partial frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
