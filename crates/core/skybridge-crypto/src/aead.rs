//! AEAD seal/open helpers for the encrypted session channel.

use crate::error::{CryptoError, Result};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AEAD nonce length used by both supported ciphers.
pub const NONCE_LEN: usize = 12;

/// AEAD tag length used by both supported ciphers.
pub const TAG_LEN: usize = 16;

/// Negotiable AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// AES-256-GCM.
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305,
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadAlgorithm::Aes256Gcm => write!(f, "AES-256-GCM"),
            AeadAlgorithm::ChaCha20Poly1305 => write!(f, "ChaCha20-Poly1305"),
        }
    }
}

/// Seals `plaintext` with a 32-byte key, returning ciphertext with the tag
/// appended.
pub fn seal(
    alg: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let payload = Payload { msg: plaintext, aad };
    match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError::EncryptionFailed("invalid key length".to_string()))?;
            cipher
                .encrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::EncryptionFailed("AEAD seal failed".to_string()))
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::EncryptionFailed("invalid key length".to_string()))?;
            cipher
                .encrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::EncryptionFailed("AEAD seal failed".to_string()))
        }
    }
}

/// Opens ciphertext (with appended tag) produced by [`seal`].
pub fn open(
    alg: AeadAlgorithm,
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let payload = Payload { msg: ciphertext, aad };
    match alg {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CryptoError::DecryptionFailed("invalid key length".to_string()))?;
            cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| CryptoError::DecryptionFailed("invalid key length".to_string()))?;
            cipher
                .decrypt(nonce.into(), payload)
                .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip_both_ciphers() {
        let key = [0x42u8; 32];
        let nonce = [7u8; NONCE_LEN];
        for alg in [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::ChaCha20Poly1305] {
            let sealed = seal(alg, &key, &nonce, b"aad", b"payload").unwrap();
            assert_eq!(sealed.len(), b"payload".len() + TAG_LEN);
            let opened = open(alg, &key, &nonce, b"aad", &sealed).unwrap();
            assert_eq!(opened, b"payload");
        }
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = [1u8; 32];
        let nonce = [2u8; NONCE_LEN];
        let mut sealed = seal(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"", b"data").unwrap();
        sealed[0] ^= 0x01;
        assert!(open(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"", &sealed).is_err());
    }

    #[test]
    fn wrong_aad_rejected() {
        let key = [1u8; 32];
        let nonce = [2u8; NONCE_LEN];
        let sealed = seal(AeadAlgorithm::ChaCha20Poly1305, &key, &nonce, b"a", b"data").unwrap();
        assert!(open(AeadAlgorithm::ChaCha20Poly1305, &key, &nonce, b"b", &sealed).is_err());
    }
}
