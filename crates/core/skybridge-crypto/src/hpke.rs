//! HPKE-style sealed box: a self-describing envelope for one-shot
//! encrypted blobs.
//!
//! Header layout (17 bytes), bit-exact across implementations:
//!
//! ```text
//! magic "HPKE" (4) || version (1) || suiteWireId (u16 LE) || flags (u16 LE)
//!   || encLen (u16 LE) || nonceLen (u8) || tagLen (u8) || ctLen (u32 LE)
//!   || enc (encLen) || nonce (nonceLen) || ct (ctLen) || tag (tagLen)
//! ```
//!
//! Version 1 is KEM-DEM with AES-256-GCM (`nonceLen = 12`, `tagLen = 16`);
//! version 2 permits raw HPKE ciphertext (`nonceLen = 0`, `tagLen = 0`).

use crate::aead::{self, AeadAlgorithm, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, Result};
use crate::suite::Suite;

/// Fixed header length.
pub const HEADER_LEN: usize = 17;

/// Sealed box magic prefix.
pub const SEALED_BOX_MAGIC: &[u8; 4] = b"HPKE";

/// Maximum encapsulated-key length.
pub const MAX_ENC_LEN: usize = 4096;

/// Decoding context, which bounds the permitted ciphertext size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealedBoxContext {
    /// During handshake: ciphertext up to 64 KiB.
    Handshake,
    /// After the handshake: ciphertext up to 256 KiB.
    PostHandshake,
}

impl SealedBoxContext {
    /// Maximum ciphertext length for this context.
    pub fn max_ct_len(&self) -> usize {
        match self {
            SealedBoxContext::Handshake => 65_536,
            SealedBoxContext::PostHandshake => 262_144,
        }
    }
}

/// A parsed sealed box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Format version (1 or 2).
    pub version: u8,
    /// Suite the box was sealed under.
    pub suite_wire_id: u16,
    /// Reserved flags.
    pub flags: u16,
    /// KEM encapsulated key (may be empty when the key is established
    /// out of band).
    pub encapsulated_key: Vec<u8>,
    /// AEAD nonce.
    pub nonce: Vec<u8>,
    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,
    /// AEAD tag.
    pub tag: Vec<u8>,
}

impl SealedBox {
    /// Serializes the box with its header.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN + self.encapsulated_key.len() + self.nonce.len()
                + self.ciphertext.len() + self.tag.len(),
        );
        out.extend_from_slice(SEALED_BOX_MAGIC);
        out.push(self.version);
        out.extend_from_slice(&self.suite_wire_id.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(self.encapsulated_key.len() as u16).to_le_bytes());
        out.push(self.nonce.len() as u8);
        out.push(self.tag.len() as u8);
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.encapsulated_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Total encoded length of a sealed box whose header starts at the
    /// beginning of `buf`, for parsers that embed boxes mid-message.
    pub fn peek_total_len(buf: &[u8]) -> Result<usize> {
        if buf.len() < HEADER_LEN {
            return Err(CryptoError::SealedBoxInvalid("truncated header".to_string()));
        }
        if &buf[..4] != SEALED_BOX_MAGIC {
            return Err(CryptoError::SealedBoxInvalid("bad magic".to_string()));
        }
        let enc_len = u16::from_le_bytes([buf[9], buf[10]]) as usize;
        let nonce_len = buf[11] as usize;
        let tag_len = buf[12] as usize;
        let ct_len = u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]) as usize;
        HEADER_LEN
            .checked_add(enc_len)
            .and_then(|n| n.checked_add(nonce_len))
            .and_then(|n| n.checked_add(ct_len))
            .and_then(|n| n.checked_add(tag_len))
            .ok_or_else(|| CryptoError::SealedBoxInvalid("length overflow".to_string()))
    }

    /// Parses and validates a sealed box.
    ///
    /// Rejects bad magic, unknown versions, nonce/tag lengths outside the
    /// version's permitted set, out-of-bounds `encLen`/`ctLen`, and any
    /// mismatch between declared lengths and the actual byte count.
    pub fn decode(buf: &[u8], context: SealedBoxContext) -> Result<Self> {
        let invalid = |msg: &str| CryptoError::SealedBoxInvalid(msg.to_string());

        if buf.len() < HEADER_LEN {
            return Err(invalid("truncated header"));
        }
        if &buf[..4] != SEALED_BOX_MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = buf[4];
        let suite_wire_id = u16::from_le_bytes([buf[5], buf[6]]);
        let flags = u16::from_le_bytes([buf[7], buf[8]]);
        let enc_len = u16::from_le_bytes([buf[9], buf[10]]) as usize;
        let nonce_len = buf[11] as usize;
        let tag_len = buf[12] as usize;
        let ct_len = u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]) as usize;

        match version {
            1 => {
                if nonce_len != NONCE_LEN || tag_len != TAG_LEN {
                    return Err(invalid("version 1 requires 12-byte nonce and 16-byte tag"));
                }
            }
            2 => {
                if nonce_len != 0 || tag_len != 0 {
                    return Err(invalid("version 2 requires empty nonce and tag"));
                }
            }
            _ => return Err(invalid("unknown version")),
        }
        if enc_len > MAX_ENC_LEN {
            return Err(invalid("encapsulated key too large"));
        }
        if ct_len > context.max_ct_len() {
            return Err(invalid("ciphertext too large for context"));
        }

        let total = HEADER_LEN
            .checked_add(enc_len)
            .and_then(|n| n.checked_add(nonce_len))
            .and_then(|n| n.checked_add(ct_len))
            .and_then(|n| n.checked_add(tag_len))
            .ok_or_else(|| invalid("length overflow"))?;
        if total != buf.len() {
            return Err(invalid("declared lengths disagree with byte count"));
        }

        let mut pos = HEADER_LEN;
        let encapsulated_key = buf[pos..pos + enc_len].to_vec();
        pos += enc_len;
        let nonce = buf[pos..pos + nonce_len].to_vec();
        pos += nonce_len;
        let ciphertext = buf[pos..pos + ct_len].to_vec();
        pos += ct_len;
        let tag = buf[pos..pos + tag_len].to_vec();

        Ok(Self { version, suite_wire_id, flags, encapsulated_key, nonce, ciphertext, tag })
    }
}

/// Seals a version-1 box under an already-established 32-byte key, with an
/// empty encapsulated-key field.
pub fn seal_with_key(
    key: &[u8],
    suite: Suite,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedBox> {
    seal_with_key_and_enc(key, suite, Vec::new(), aad, plaintext)
}

/// Seals a version-1 box under a 32-byte key, carrying the given
/// encapsulated key in the header.
pub fn seal_with_key_and_enc(
    key: &[u8],
    suite: Suite,
    encapsulated_key: Vec<u8>,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedBox> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::RandomGenerationFailed)?;

    let sealed = aead::seal(AeadAlgorithm::Aes256Gcm, key, &nonce, aad, plaintext)?;
    let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    Ok(SealedBox {
        version: 1,
        suite_wire_id: suite.wire_id(),
        flags: 0,
        encapsulated_key,
        nonce: nonce.to_vec(),
        ciphertext: ct.to_vec(),
        tag: tag.to_vec(),
    })
}

/// Opens a version-1 box with an already-established 32-byte key.
pub fn open_with_key(key: &[u8], sealed: &SealedBox, aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.version != 1 {
        return Err(CryptoError::SealedBoxInvalid(
            "only version 1 boxes carry an AEAD nonce and tag".to_string(),
        ));
    }
    let nonce: [u8; NONCE_LEN] = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::SealedBoxInvalid("bad nonce length".to_string()))?;
    let mut ct_and_tag = Vec::with_capacity(sealed.ciphertext.len() + sealed.tag.len());
    ct_and_tag.extend_from_slice(&sealed.ciphertext);
    ct_and_tag.extend_from_slice(&sealed.tag);
    aead::open(AeadAlgorithm::Aes256Gcm, key, &nonce, aad, &ct_and_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_box() -> SealedBox {
        seal_with_key(&[0x55; 32], Suite::X25519Ed25519, b"aad", b"hello sealed world").unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let sealed = sample_box();
        let buf = sealed.encode();
        let parsed = SealedBox::decode(&buf, SealedBoxContext::Handshake).unwrap();
        assert_eq!(parsed, sealed);
        let opened = open_with_key(&[0x55; 32], &parsed, b"aad").unwrap();
        assert_eq!(opened, b"hello sealed world");
    }

    #[test]
    fn header_layout_is_exact() {
        let sealed = sample_box();
        let buf = sealed.encode();
        assert_eq!(&buf[..4], b"HPKE");
        assert_eq!(buf[4], 1);
        assert_eq!(u16::from_le_bytes([buf[5], buf[6]]), 0x1001);
        assert_eq!(buf[11], 12);
        assert_eq!(buf[12], 16);
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut buf = sample_box().encode();
        buf.push(0xFF);
        assert!(SealedBox::decode(&buf, SealedBoxContext::Handshake).is_err());
        buf.pop();
        buf.pop();
        assert!(SealedBox::decode(&buf, SealedBoxContext::Handshake).is_err());
    }

    #[test]
    fn oversize_enc_len_rejected() {
        let mut sealed = sample_box();
        sealed.encapsulated_key = vec![0; MAX_ENC_LEN + 1];
        let buf = sealed.encode();
        assert!(SealedBox::decode(&buf, SealedBoxContext::Handshake).is_err());
    }

    #[test]
    fn context_bounds_ciphertext() {
        let mut sealed = sample_box();
        sealed.ciphertext = vec![0; 100_000];
        let buf = sealed.encode();
        assert!(SealedBox::decode(&buf, SealedBoxContext::Handshake).is_err());
        assert!(SealedBox::decode(&buf, SealedBoxContext::PostHandshake).is_ok());
    }

    #[test]
    fn version_constraints_enforced() {
        let mut sealed = sample_box();
        sealed.version = 2;
        // Version 2 must have empty nonce and tag.
        let buf = sealed.encode();
        assert!(SealedBox::decode(&buf, SealedBoxContext::Handshake).is_err());

        let raw = SealedBox {
            version: 2,
            suite_wire_id: 0x0001,
            flags: 0,
            encapsulated_key: vec![1, 2, 3],
            nonce: Vec::new(),
            ciphertext: vec![9; 40],
            tag: Vec::new(),
        };
        assert!(SealedBox::decode(&raw.encode(), SealedBoxContext::Handshake).is_ok());

        let mut bad = sample_box();
        bad.version = 9;
        assert!(SealedBox::decode(&bad.encode(), SealedBoxContext::Handshake).is_err());
    }

    #[test]
    fn tampered_tag_fails_open() {
        let mut sealed = sample_box();
        sealed.tag[0] ^= 0x80;
        assert!(open_with_key(&[0x55; 32], &sealed, b"aad").is_err());
    }
}
