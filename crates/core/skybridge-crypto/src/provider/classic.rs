//! Classic elliptic-curve provider: X25519/P-256 key agreement, Ed25519
//! and P-256 ECDSA signatures.

use crate::error::{CryptoError, Result};
use crate::identity::{KeyPair, KeyUsage};
use crate::provider::{CryptoProvider, Encapsulation, SigningKeyHandle, Tier};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};
use async_trait::async_trait;
use ed25519_dalek::Verifier;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

const CLASSIC_SUITES: [Suite; 2] = [Suite::X25519Ed25519, Suite::P256Ecdsa];

/// Provider backed purely by classical elliptic-curve cryptography.
#[derive(Debug, Default)]
pub struct ClassicProvider;

impl ClassicProvider {
    /// Creates a classic provider.
    pub fn new() -> Self {
        Self
    }
}

fn bad_key(msg: impl Into<String>) -> CryptoError {
    CryptoError::InvalidKeyFormat(msg.into())
}

/// X25519 with a fresh ephemeral key: returns (ephemeral public, shared).
pub(crate) fn x25519_encapsulate(recipient_public: &[u8]) -> Result<([u8; 32], SecureBytes)> {
    let pk_bytes: [u8; 32] = recipient_public
        .try_into()
        .map_err(|_| bad_key("X25519 public key must be 32 bytes"))?;
    let recipient = x25519_dalek::PublicKey::from(pk_bytes);
    let ephemeral = x25519_dalek::StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::KeyExchangeFailed("non-contributory X25519 result".to_string()));
    }
    Ok((ephemeral_public.to_bytes(), SecureBytes::from_slice(shared.as_bytes())))
}

/// X25519 between a held secret and a peer public key.
pub(crate) fn x25519_agree(secret: &[u8], peer_public: &[u8]) -> Result<SecureBytes> {
    let sk_bytes: [u8; 32] =
        secret.try_into().map_err(|_| bad_key("X25519 secret key must be 32 bytes"))?;
    let pk_bytes: [u8; 32] =
        peer_public.try_into().map_err(|_| bad_key("X25519 public key must be 32 bytes"))?;
    let secret = x25519_dalek::StaticSecret::from(sk_bytes);
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(pk_bytes));
    if !shared.was_contributory() {
        return Err(CryptoError::KeyExchangeFailed("non-contributory X25519 result".to_string()));
    }
    Ok(SecureBytes::from_slice(shared.as_bytes()))
}

/// X25519 public key derived from a secret.
pub(crate) fn x25519_public_of(secret: &[u8]) -> Result<[u8; 32]> {
    let sk_bytes: [u8; 32] =
        secret.try_into().map_err(|_| bad_key("X25519 secret key must be 32 bytes"))?;
    Ok(x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(sk_bytes)).to_bytes())
}

fn p256_parse_public(bytes: &[u8]) -> Result<p256::PublicKey> {
    p256::PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| bad_key("P-256 public key must be a valid SEC1 point"))
}

fn p256_agree(secret: &[u8], peer_public: &[u8]) -> Result<SecureBytes> {
    let sk = p256::SecretKey::from_slice(secret)
        .map_err(|_| bad_key("P-256 secret key must be 32 bytes"))?;
    let pk = p256_parse_public(peer_public)?;
    let shared = p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
    Ok(SecureBytes::from_slice(shared.raw_secret_bytes().as_slice()))
}

// Enclave keys are P-256 only, and even those are reached through a
// callback handle in this core.
fn reject_enclave_handle(algorithm: SignatureAlgorithm) -> CryptoError {
    match algorithm {
        SignatureAlgorithm::Ed25519 | SignatureAlgorithm::MlDsa65 => {
            CryptoError::UnsupportedKeyHandle(format!(
                "{algorithm} does not support secure enclave handles"
            ))
        }
        SignatureAlgorithm::P256Ecdsa => CryptoError::UnsupportedKeyHandle(
            "secure enclave access requires a callback handle".to_string(),
        ),
    }
}

pub(crate) fn ed25519_sign(data: &[u8], key: &SecureBytes) -> Result<Vec<u8>> {
    use ed25519_dalek::Signer;
    let signing_key = match key.len() {
        32 => {
            let seed: [u8; 32] = key.as_ref().try_into().expect("length checked");
            ed25519_dalek::SigningKey::from_bytes(&seed)
        }
        64 => {
            let pair: [u8; 64] = key.as_ref().try_into().expect("length checked");
            ed25519_dalek::SigningKey::from_keypair_bytes(&pair)
                .map_err(|_| bad_key("inconsistent Ed25519 keypair bytes"))?
        }
        other => return Err(bad_key(format!("Ed25519 private key must be 32 or 64 bytes, got {other}"))),
    };
    Ok(signing_key.sign(data).to_bytes().to_vec())
}

pub(crate) fn ed25519_verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    let pk_bytes: [u8; 32] =
        public_key.try_into().map_err(|_| bad_key("Ed25519 public key must be 32 bytes"))?;
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|_| bad_key("invalid Ed25519 public key"))?;
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| {
        CryptoError::InvalidSignatureFormat("Ed25519 signature must be 64 bytes".to_string())
    })?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    Ok(verifying_key.verify(data, &signature).is_ok())
}

pub(crate) fn p256_sign(data: &[u8], key: &SecureBytes) -> Result<Vec<u8>> {
    let signing_key = p256::ecdsa::SigningKey::from_slice(key.as_ref())
        .map_err(|_| bad_key("P-256 signing key must be 32 bytes"))?;
    let signature: p256::ecdsa::Signature = signing_key.sign(data);
    Ok(signature.to_bytes().to_vec())
}

pub(crate) fn p256_verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool> {
    let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| bad_key("invalid P-256 public key"))?;
    let signature = p256::ecdsa::Signature::from_slice(signature).map_err(|_| {
        CryptoError::InvalidSignatureFormat("P-256 signature must be 64-byte r||s".to_string())
    })?;
    Ok(verifying_key.verify(data, &signature).is_ok())
}

#[async_trait]
impl CryptoProvider for ClassicProvider {
    fn tier(&self) -> Option<Tier> {
        Some(Tier::Classic)
    }

    fn supported_suites(&self) -> &[Suite] {
        &CLASSIC_SUITES
    }

    async fn generate_keypair(&self, suite: Suite, usage: KeyUsage) -> Result<KeyPair> {
        match (suite, usage) {
            (Suite::X25519Ed25519, KeyUsage::KeyExchange) => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.to_bytes().to_vec(),
                    secret: SecureBytes::from_slice(&secret.to_bytes()),
                })
            }
            (Suite::X25519Ed25519, KeyUsage::Signing) => {
                let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
                Ok(KeyPair {
                    suite,
                    usage,
                    public: signing_key.verifying_key().to_bytes().to_vec(),
                    secret: SecureBytes::from_slice(&signing_key.to_bytes()),
                })
            }
            (Suite::P256Ecdsa, KeyUsage::KeyExchange) => {
                let secret = p256::SecretKey::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false);
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.as_bytes().to_vec(),
                    secret: SecureBytes::from_slice(secret.to_bytes().as_slice()),
                })
            }
            (Suite::P256Ecdsa, KeyUsage::Signing) => {
                let signing_key = p256::ecdsa::SigningKey::random(&mut OsRng);
                let public = signing_key.verifying_key().to_encoded_point(false);
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.as_bytes().to_vec(),
                    secret: SecureBytes::from_slice(signing_key.to_bytes().as_slice()),
                })
            }
            _ => Err(CryptoError::UnsupportedSuite(suite.wire_id())),
        }
    }

    async fn kem_encapsulate(&self, suite: Suite, recipient_public: &[u8]) -> Result<Encapsulation> {
        match suite {
            Suite::X25519Ed25519 => {
                let (ephemeral_public, shared) = x25519_encapsulate(recipient_public)?;
                Ok(Encapsulation {
                    encapsulated_key: ephemeral_public.to_vec(),
                    shared_secret: shared,
                })
            }
            Suite::P256Ecdsa => {
                if recipient_public.len() != 65 {
                    return Err(bad_key("P-256 public key must be 65 bytes uncompressed"));
                }
                let recipient = p256_parse_public(recipient_public)?;
                let ephemeral = p256::SecretKey::random(&mut OsRng);
                let ephemeral_public = ephemeral.public_key().to_encoded_point(false);
                let shared =
                    p256::ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), recipient.as_affine());
                Ok(Encapsulation {
                    encapsulated_key: ephemeral_public.as_bytes().to_vec(),
                    shared_secret: SecureBytes::from_slice(shared.raw_secret_bytes().as_slice()),
                })
            }
            _ => Err(CryptoError::UnsupportedSuite(suite.wire_id())),
        }
    }

    async fn kem_decapsulate(
        &self,
        suite: Suite,
        encapsulated_key: &[u8],
        secret: &SecureBytes,
    ) -> Result<SecureBytes> {
        match suite {
            Suite::X25519Ed25519 => x25519_agree(secret.as_ref(), encapsulated_key),
            Suite::P256Ecdsa => p256_agree(secret.as_ref(), encapsulated_key),
            _ => Err(CryptoError::UnsupportedSuite(suite.wire_id())),
        }
    }

    async fn sign(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        key: &SigningKeyHandle,
    ) -> Result<Vec<u8>> {
        let software = match key {
            SigningKeyHandle::Software(software) => software,
            SigningKeyHandle::Callback(sign_fn) => return sign_fn(data),
            SigningKeyHandle::SecureEnclaveRef(_) => {
                return Err(reject_enclave_handle(algorithm))
            }
        };
        match algorithm {
            SignatureAlgorithm::Ed25519 => ed25519_sign(data, software),
            SignatureAlgorithm::P256Ecdsa => p256_sign(data, software),
            SignatureAlgorithm::MlDsa65 => Err(CryptoError::ProviderNotAvailable(
                "ML-DSA-65 requires a post-quantum provider".to_string(),
            )),
        }
    }

    async fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool> {
        match algorithm {
            SignatureAlgorithm::Ed25519 => ed25519_verify(data, signature, public_key),
            SignatureAlgorithm::P256Ecdsa => p256_verify(data, signature, public_key),
            SignatureAlgorithm::MlDsa65 => Err(CryptoError::ProviderNotAvailable(
                "ML-DSA-65 requires a post-quantum provider".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn x25519_encap_decap_agree() {
        let provider = ClassicProvider::new();
        let pair = provider
            .generate_keypair(Suite::X25519Ed25519, KeyUsage::KeyExchange)
            .await
            .unwrap();
        let encapsulation =
            provider.kem_encapsulate(Suite::X25519Ed25519, &pair.public).await.unwrap();
        let recovered = provider
            .kem_decapsulate(Suite::X25519Ed25519, &encapsulation.encapsulated_key, &pair.secret)
            .await
            .unwrap();
        assert_eq!(recovered, encapsulation.shared_secret);
    }

    #[tokio::test]
    async fn p256_encap_decap_agree() {
        let provider = ClassicProvider::new();
        let pair =
            provider.generate_keypair(Suite::P256Ecdsa, KeyUsage::KeyExchange).await.unwrap();
        assert_eq!(pair.public.len(), 65);
        let encapsulation = provider.kem_encapsulate(Suite::P256Ecdsa, &pair.public).await.unwrap();
        assert_eq!(encapsulation.encapsulated_key.len(), 65);
        let recovered = provider
            .kem_decapsulate(Suite::P256Ecdsa, &encapsulation.encapsulated_key, &pair.secret)
            .await
            .unwrap();
        assert_eq!(recovered, encapsulation.shared_secret);
    }

    #[tokio::test]
    async fn mis_sized_recipient_key_rejected() {
        let provider = ClassicProvider::new();
        let err =
            provider.kem_encapsulate(Suite::X25519Ed25519, &[0u8; 31]).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyFormat(_)));
    }

    #[tokio::test]
    async fn ed25519_sign_verify_round_trip() {
        let provider = ClassicProvider::new();
        let pair =
            provider.generate_keypair(Suite::X25519Ed25519, KeyUsage::Signing).await.unwrap();
        let handle = SigningKeyHandle::Software(pair.secret.clone());
        let signature =
            provider.sign(SignatureAlgorithm::Ed25519, b"message", &handle).await.unwrap();
        assert!(provider
            .verify(SignatureAlgorithm::Ed25519, b"message", &signature, &pair.public)
            .await
            .unwrap());
        assert!(!provider
            .verify(SignatureAlgorithm::Ed25519, b"other", &signature, &pair.public)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ecdsa_sign_verify_round_trip() {
        let provider = ClassicProvider::new();
        let pair = provider.generate_keypair(Suite::P256Ecdsa, KeyUsage::Signing).await.unwrap();
        let handle = SigningKeyHandle::Software(pair.secret.clone());
        let signature =
            provider.sign(SignatureAlgorithm::P256Ecdsa, b"payload", &handle).await.unwrap();
        assert_eq!(signature.len(), 64);
        assert!(provider
            .verify(SignatureAlgorithm::P256Ecdsa, b"payload", &signature, &pair.public)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn enclave_handle_rejected_for_ed25519() {
        let provider = ClassicProvider::new();
        let handle = SigningKeyHandle::SecureEnclaveRef(b"keyref".to_vec());
        let err =
            provider.sign(SignatureAlgorithm::Ed25519, b"data", &handle).await.unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedKeyHandle(_)));
    }

    #[tokio::test]
    async fn callback_handle_is_invoked() {
        let provider = ClassicProvider::new();
        let handle = SigningKeyHandle::Callback(std::sync::Arc::new(|data: &[u8]| {
            Ok(data.iter().rev().copied().collect())
        }));
        let signature =
            provider.sign(SignatureAlgorithm::P256Ecdsa, &[1, 2, 3], &handle).await.unwrap();
        assert_eq!(signature, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn malformed_signature_is_error_not_false() {
        let provider = ClassicProvider::new();
        let pair =
            provider.generate_keypair(Suite::X25519Ed25519, KeyUsage::Signing).await.unwrap();
        let err = provider
            .verify(SignatureAlgorithm::Ed25519, b"m", &[0u8; 10], &pair.public)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSignatureFormat(_)));
    }
}
