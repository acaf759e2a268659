//! Deterministic binary encoder and strict decoder.
//!
//! Primitive encodings are normative for the protocol: multi-byte integers
//! are little-endian, strings and byte blobs carry a `u32` length prefix,
//! dates are `i64` milliseconds since the Unix epoch, optionals are a flag
//! byte followed by the value, arrays a `u32` count followed by elements.
//! Structs encode their fields in declaration order with no padding or tags.
//!
//! Encoding the same value always yields the same bytes, and the decoder
//! rejects any input with trailing bytes or out-of-range lengths.

use crate::error::{Result, WireError};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

/// Deterministic byte-stream encoder.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Creates an encoder with pre-reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity) }
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Appends a `u16` in little-endian order.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    /// Appends a `u32` in little-endian order.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    /// Appends a `u64` in little-endian order.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Appends an `i64` in little-endian two's complement.
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    /// Appends a boolean as `0x00` or `0x01`.
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Appends a UTF-8 string with a `u32` little-endian length prefix.
    pub fn put_string(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Appends a byte blob with a `u32` little-endian length prefix.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_u32(b.len() as u32);
        self.buf.put_slice(b);
    }

    /// Appends raw bytes with no length prefix.
    pub fn put_raw(&mut self, b: &[u8]) {
        self.buf.put_slice(b);
    }

    /// Appends a date as `i64` milliseconds since the Unix epoch.
    pub fn put_date(&mut self, t: DateTime<Utc>) {
        self.put_i64(t.timestamp_millis());
    }

    /// Appends an optional value: a flag byte, then the value if present.
    pub fn put_optional<T>(&mut self, v: Option<&T>, mut f: impl FnMut(&mut Self, &T)) {
        match v {
            Some(value) => {
                self.put_u8(0x01);
                f(self, value);
            }
            None => self.put_u8(0x00),
        }
    }

    /// Appends an array: a `u32` little-endian count, then the elements.
    pub fn put_array<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) {
        self.put_u32(items.len() as u32);
        for item in items {
            f(self, item);
        }
    }

    /// Number of bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Strict decoder over a byte slice.
///
/// Reads are bounds-checked against this decoder's own slice, never against
/// any outer buffer. [`Decoder::finish`] fails if bytes remain.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the given bytes.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(WireError::UnexpectedEof { needed: n, available: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a single byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian `u32`.
    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u64`.
    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    /// Reads a little-endian two's complement `i64`.
    pub fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    /// Reads a boolean, rejecting any flag byte other than 0x00/0x01.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(WireError::InvalidFlag(other)),
        }
    }

    /// Reads exactly `n` raw bytes.
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads a `u32`-length-prefixed byte blob.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        if len > self.buf.len() {
            return Err(WireError::LengthOutOfRange { declared: len, available: self.buf.len() });
        }
        self.take(len)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    /// Reads a date stored as `i64` milliseconds since the Unix epoch.
    pub fn date(&mut self) -> Result<DateTime<Utc>> {
        let ms = self.i64()?;
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or(WireError::InvalidTimestamp(ms))
    }

    /// Reads an optional value.
    pub fn optional<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Option<T>> {
        if self.bool()? {
            Ok(Some(f(self)?))
        } else {
            Ok(None)
        }
    }

    /// Reads a `u32`-counted array.
    pub fn array<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.u32()? as usize;
        // Each element occupies at least one byte; a larger count is a lie.
        if count > self.buf.len() {
            return Err(WireError::LengthOutOfRange { declared: count, available: self.buf.len() });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Returns a sub-decoder over the next `n` bytes. The sub-decoder's
    /// bounds are its own; it cannot read past its declared window.
    pub fn sub(&mut self, n: usize) -> Result<Decoder<'a>> {
        if n > self.buf.len() {
            return Err(WireError::LengthOutOfRange { declared: n, available: self.buf.len() });
        }
        Ok(Decoder::new(self.take(n)?))
    }

    /// Asserts that the input was fully consumed.
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(self.buf.len()))
        }
    }
}

/// Types with a deterministic wire encoding.
pub trait WireEncode {
    /// Appends this value's encoding to the encoder.
    fn encode(&self, enc: &mut Encoder);

    /// Encodes this value into a fresh byte vector.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.into_bytes()
    }
}

/// Types decodable from their deterministic wire encoding.
pub trait WireDecode: Sized {
    /// Decodes a value, consuming exactly its encoding.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self>;

    /// Decodes a value from a buffer that must contain nothing else.
    fn decode_exact(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf);
        let value = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn primitives_round_trip() {
        let mut enc = Encoder::new();
        enc.put_u8(0xAB);
        enc.put_u16(0x1234);
        enc.put_u32(0xDEADBEEF);
        enc.put_u64(0x0102030405060708);
        enc.put_i64(-42);
        enc.put_bool(true);
        enc.put_string("skybridge");
        enc.put_bytes(&[1, 2, 3]);
        let buf = enc.into_bytes();

        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.u8().unwrap(), 0xAB);
        assert_eq!(dec.u16().unwrap(), 0x1234);
        assert_eq!(dec.u32().unwrap(), 0xDEADBEEF);
        assert_eq!(dec.u64().unwrap(), 0x0102030405060708);
        assert_eq!(dec.i64().unwrap(), -42);
        assert!(dec.bool().unwrap());
        assert_eq!(dec.string().unwrap(), "skybridge");
        assert_eq!(dec.bytes().unwrap(), &[1, 2, 3]);
        dec.finish().unwrap();
    }

    #[test]
    fn little_endian_layout_is_exact() {
        let mut enc = Encoder::new();
        enc.put_u16(0x0102);
        enc.put_u32(0x03040506);
        assert_eq!(enc.into_bytes(), vec![0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let buf = [0x01, 0x00];
        let mut dec = Decoder::new(&buf);
        dec.u8().unwrap();
        assert_eq!(dec.finish(), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        // Declared blob length of 100 with only 2 bytes behind it.
        let mut enc = Encoder::new();
        enc.put_u32(100);
        enc.put_raw(&[0xAA, 0xBB]);
        let buf = enc.into_bytes();
        let mut dec = Decoder::new(&buf);
        assert!(matches!(dec.bytes(), Err(WireError::LengthOutOfRange { declared: 100, .. })));
    }

    #[test]
    fn bad_flag_byte_rejected() {
        let buf = [0x02];
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.bool(), Err(WireError::InvalidFlag(0x02)));
    }

    #[test]
    fn optional_and_array_round_trip() {
        let mut enc = Encoder::new();
        enc.put_optional(Some(&7u16), |e, v| e.put_u16(*v));
        enc.put_optional(None::<&u16>, |e, v| e.put_u16(*v));
        enc.put_array(&[1u32, 2, 3], |e, v| e.put_u32(*v));
        let buf = enc.into_bytes();

        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.optional(|d| d.u16()).unwrap(), Some(7));
        assert_eq!(dec.optional(|d| d.u16()).unwrap(), None);
        assert_eq!(dec.array(|d| d.u32()).unwrap(), vec![1, 2, 3]);
        dec.finish().unwrap();
    }

    #[test]
    fn sub_decoder_is_bounded_by_its_window() {
        let buf = [0x01, 0x02, 0x03, 0x04];
        let mut dec = Decoder::new(&buf);
        let mut sub = dec.sub(2).unwrap();
        sub.u8().unwrap();
        sub.u8().unwrap();
        // The sub-decoder must not see the outer remainder.
        assert!(matches!(sub.u8(), Err(WireError::UnexpectedEof { .. })));
        assert_eq!(dec.remaining(), 2);
    }

    #[test]
    fn date_round_trip_preserves_milliseconds() {
        let t = Utc.timestamp_millis_opt(1_722_470_400_123).single().unwrap();
        let mut enc = Encoder::new();
        enc.put_date(t);
        let buf = enc.into_bytes();
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.date().unwrap(), t);
    }

    proptest! {
        #[test]
        fn string_round_trip(s in ".*") {
            let mut enc = Encoder::new();
            enc.put_string(&s);
            let buf = enc.into_bytes();
            let mut dec = Decoder::new(&buf);
            prop_assert_eq!(dec.string().unwrap(), s);
            dec.finish().unwrap();
        }

        #[test]
        fn bytes_round_trip(b in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut enc = Encoder::new();
            enc.put_bytes(&b);
            let buf = enc.into_bytes();
            let mut dec = Decoder::new(&buf);
            prop_assert_eq!(dec.bytes().unwrap().to_vec(), b);
            dec.finish().unwrap();
        }

        #[test]
        fn encoding_is_deterministic(v in any::<u64>(), s in ".{0,64}") {
            let encode = |v: u64, s: &str| {
                let mut enc = Encoder::new();
                enc.put_u64(v);
                enc.put_string(s);
                enc.into_bytes()
            };
            prop_assert_eq!(encode(v, &s), encode(v, &s));
        }
    }
}
