//! Identity public key wire form and key material validation.

use crate::error::{CryptoError, Result};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};

/// What a key is for. Length validation is suite- and usage-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    /// KEM / key agreement.
    KeyExchange,
    /// Digital signatures.
    Signing,
}

/// A device's long-term identity public keys in wire form.
///
/// Encoding: `algByte(1) || len16LE || protoKey || hasSE(1) || [len16LE || seKey]`.
/// A legacy decode path accepts a bare 65-byte uncompressed P-256 point and
/// only that shape; any other unparseable input fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPublicKeys {
    /// Algorithm of the protocol identity key.
    pub algorithm: SignatureAlgorithm,
    /// The protocol identity public key.
    pub protocol_public_key: Vec<u8>,
    /// Optional Secure Enclave P-256 public key for proof of possession.
    pub secure_enclave_public_key: Option<Vec<u8>>,
}

fn algorithm_byte(alg: SignatureAlgorithm) -> u8 {
    match alg {
        SignatureAlgorithm::Ed25519 => 0x01,
        SignatureAlgorithm::MlDsa65 => 0x02,
        SignatureAlgorithm::P256Ecdsa => 0x03,
    }
}

fn algorithm_from_byte(byte: u8) -> Result<SignatureAlgorithm> {
    match byte {
        0x01 => Ok(SignatureAlgorithm::Ed25519),
        0x02 => Ok(SignatureAlgorithm::MlDsa65),
        0x03 => Ok(SignatureAlgorithm::P256Ecdsa),
        other => Err(CryptoError::InvalidKeyFormat(format!(
            "unknown identity algorithm byte {other:#04x}"
        ))),
    }
}

impl IdentityPublicKeys {
    /// Creates identity keys, validating the protocol key length.
    pub fn new(
        algorithm: SignatureAlgorithm,
        protocol_public_key: Vec<u8>,
        secure_enclave_public_key: Option<Vec<u8>>,
    ) -> Result<Self> {
        let keys = Self { algorithm, protocol_public_key, secure_enclave_public_key };
        keys.validate()?;
        Ok(keys)
    }

    /// Validates key lengths against the algorithm.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_public_key.len() != self.algorithm.public_key_len() {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "{} identity key must be {} bytes, got {}",
                self.algorithm,
                self.algorithm.public_key_len(),
                self.protocol_public_key.len()
            )));
        }
        if let Some(se) = &self.secure_enclave_public_key {
            if se.len() != 65 || se[0] != 0x04 {
                return Err(CryptoError::InvalidKeyFormat(
                    "secure enclave key must be a 65-byte uncompressed P-256 point".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Serializes to the wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.protocol_public_key.len());
        out.push(algorithm_byte(self.algorithm));
        out.extend_from_slice(&(self.protocol_public_key.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.protocol_public_key);
        match &self.secure_enclave_public_key {
            Some(se) => {
                out.push(0x01);
                out.extend_from_slice(&(se.len() as u16).to_le_bytes());
                out.extend_from_slice(se);
            }
            None => out.push(0x00),
        }
        out
    }

    /// Parses the wire form, including the legacy bare P-256 shape.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        // Legacy identities are a bare uncompressed P-256 point and exactly
        // that; no other fallback shape is accepted.
        if buf.len() == 65 && buf[0] == 0x04 {
            return Self::new(SignatureAlgorithm::P256Ecdsa, buf.to_vec(), None);
        }

        let malformed = || CryptoError::InvalidKeyFormat("malformed identity key blob".to_string());

        if buf.len() < 4 {
            return Err(malformed());
        }
        let algorithm = algorithm_from_byte(buf[0])?;
        let key_len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let mut pos = 3;
        if buf.len() < pos + key_len + 1 {
            return Err(malformed());
        }
        let protocol_public_key = buf[pos..pos + key_len].to_vec();
        pos += key_len;
        let has_se = buf[pos];
        pos += 1;
        let secure_enclave_public_key = match has_se {
            0x00 => None,
            0x01 => {
                if buf.len() < pos + 2 {
                    return Err(malformed());
                }
                let se_len = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
                pos += 2;
                if buf.len() < pos + se_len {
                    return Err(malformed());
                }
                let se = buf[pos..pos + se_len].to_vec();
                pos += se_len;
                Some(se)
            }
            _ => return Err(malformed()),
        };
        if pos != buf.len() {
            return Err(malformed());
        }
        Self::new(algorithm, protocol_public_key, secure_enclave_public_key)
    }
}

/// Keying material bound to a suite and usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// The suite this material belongs to.
    pub suite: Suite,
    /// What the material is for.
    pub usage: KeyUsage,
    /// The raw key bytes (public material).
    pub bytes: Vec<u8>,
    /// Serialization format version.
    pub format_version: u8,
}

impl KeyMaterial {
    /// Current format version.
    pub const FORMAT_VERSION: u8 = 1;

    /// Creates public key material, validating its length for the suite
    /// and usage.
    pub fn public(suite: Suite, usage: KeyUsage, bytes: Vec<u8>) -> Result<Self> {
        let expected = match usage {
            KeyUsage::KeyExchange => suite.kem_public_len(),
            KeyUsage::Signing => suite.sig_public_len(),
        }
        .ok_or(CryptoError::UnsupportedSuite(suite.wire_id()))?;
        if bytes.len() != expected {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "{suite} {usage:?} public key must be {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { suite, usage, bytes, format_version: Self::FORMAT_VERSION })
    }

    /// Validates a private key length for the suite and usage. PQC suites
    /// accept both seed and expanded backend forms.
    pub fn validate_secret_len(suite: Suite, usage: KeyUsage, len: usize) -> Result<()> {
        let accepted = match usage {
            KeyUsage::KeyExchange => suite.kem_secret_lens(),
            KeyUsage::Signing => suite.sig_secret_lens(),
        };
        if accepted.is_empty() {
            return Err(CryptoError::UnsupportedSuite(suite.wire_id()));
        }
        if !accepted.contains(&len) {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "{suite} {usage:?} private key length {len} not in {accepted:?}"
            )));
        }
        Ok(())
    }
}

/// A generated keypair: public material plus the private half in a wiped
/// container.
#[derive(Debug)]
pub struct KeyPair {
    /// The suite the pair was generated for.
    pub suite: Suite,
    /// What the pair is for.
    pub usage: KeyUsage,
    /// Public key bytes.
    pub public: Vec<u8>,
    /// Private key bytes, zeroized on drop.
    pub secret: SecureBytes,
}
