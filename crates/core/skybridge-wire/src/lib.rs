//! # SkyBridge Wire
//!
//! Deterministic, bit-exact wire formats for the SkyBridge P2P session core.
//!
//! This crate contains the lowest layer of the protocol stack:
//! - A strict binary codec with normative primitive encodings
//!   ([`codec::Encoder`] / [`codec::Decoder`]).
//! - The 4-byte big-endian length framing used on the transport
//!   ([`framing`]).
//! - The `SBE1` business envelope for post-handshake payloads
//!   ([`envelope`]).
//!
//! Encoding a value is byte-identical across runs and platforms, and every
//! decoder rejects trailing bytes and out-of-range lengths.

#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod error;
pub mod framing;

pub use codec::{Decoder, Encoder, WireDecode, WireEncode};
pub use envelope::BusinessEnvelope;
pub use error::{Result, WireError};
pub use framing::{encode_frame, FrameReader, FRAME_HEADER_LEN, MAX_FRAME_LEN};
