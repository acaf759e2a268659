//! Error types for the wire codec.

use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while encoding or decoding wire data.
///
/// Every parser in this crate is strict: declared lengths must match the
/// bytes actually present, and a fully consumed structure must leave no
/// trailing bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Ran out of input before the structure was complete.
    #[error("unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Bytes required by the current read.
        needed: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// A declared length exceeds what the container can hold.
    #[error("declared length {declared} out of range ({available} bytes available)")]
    LengthOutOfRange {
        /// Length claimed by the prefix.
        declared: usize,
        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// Bytes remained after a typed structure was fully consumed.
    #[error("{0} trailing bytes after complete structure")]
    TrailingBytes(usize),

    /// A string field did not contain valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A boolean or optional flag byte was neither 0x00 nor 0x01.
    #[error("invalid flag byte {0:#04x}")]
    InvalidFlag(u8),

    /// A magic prefix did not match.
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// A millisecond-epoch timestamp was outside the representable range.
    #[error("timestamp {0} out of range")]
    InvalidTimestamp(i64),

    /// A frame exceeded the transport maximum.
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared or actual frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}
