//! liboqs-backed post-quantum provider.
//!
//! Mirrors the native provider's surface with the `oqs` crate supplying
//! ML-KEM-768 and ML-DSA-65. Classic suites delegate to [`ClassicProvider`].

use crate::error::{CryptoError, Result};
use crate::identity::{KeyPair, KeyUsage};
use crate::provider::classic::{self, ClassicProvider};
use crate::provider::{xwing_combine, CryptoProvider, Encapsulation, SigningKeyHandle, Tier};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};
use async_trait::async_trait;
use rand::rngs::OsRng;

const ML_KEM_768_PUBLIC_LEN: usize = 1184;
const ML_KEM_768_CIPHERTEXT_LEN: usize = 1088;
const X25519_LEN: usize = 32;

const LIBOQS_SUITES: [Suite; 4] = [
    Suite::XWingMlDsa65,
    Suite::MlKem768MlDsa65,
    Suite::X25519Ed25519,
    Suite::P256Ecdsa,
];

/// Provider backed by liboqs.
#[derive(Debug, Default)]
pub struct LiboqsProvider {
    classic: ClassicProvider,
}

impl LiboqsProvider {
    /// Creates a liboqs provider, initializing the library.
    pub fn new() -> Self {
        oqs::init();
        Self { classic: ClassicProvider::new() }
    }
}

fn bad_key(msg: impl Into<String>) -> CryptoError {
    CryptoError::InvalidKeyFormat(msg.into())
}

fn backend(err: impl std::fmt::Display) -> CryptoError {
    CryptoError::KeyExchangeFailed(format!("liboqs: {err}"))
}

fn mlkem() -> Result<oqs::kem::Kem> {
    oqs::kem::Kem::new(oqs::kem::Algorithm::MlKem768)
        .map_err(|e| CryptoError::ProviderNotAvailable(format!("liboqs ML-KEM-768: {e}")))
}

fn mldsa() -> Result<oqs::sig::Sig> {
    oqs::sig::Sig::new(oqs::sig::Algorithm::MlDsa65)
        .map_err(|e| CryptoError::ProviderNotAvailable(format!("liboqs ML-DSA-65: {e}")))
}

fn mlkem_encapsulate(recipient_public: &[u8]) -> Result<(Vec<u8>, SecureBytes)> {
    if recipient_public.len() != ML_KEM_768_PUBLIC_LEN {
        return Err(bad_key(format!(
            "ML-KEM-768 public key must be {ML_KEM_768_PUBLIC_LEN} bytes, got {}",
            recipient_public.len()
        )));
    }
    let kem = mlkem()?;
    let public = kem
        .public_key_from_bytes(recipient_public)
        .ok_or_else(|| bad_key("invalid ML-KEM-768 public key"))?;
    let (ciphertext, shared) = kem.encapsulate(public).map_err(backend)?;
    Ok((
        ciphertext.into_vec(),
        SecureBytes::new(shared.into_vec()),
    ))
}

fn mlkem_decapsulate(encapsulated: &[u8], secret: &[u8]) -> Result<SecureBytes> {
    if encapsulated.len() != ML_KEM_768_CIPHERTEXT_LEN {
        return Err(bad_key(format!(
            "ML-KEM-768 ciphertext must be {ML_KEM_768_CIPHERTEXT_LEN} bytes, got {}",
            encapsulated.len()
        )));
    }
    let kem = mlkem()?;
    let secret_key = kem
        .secret_key_from_bytes(secret)
        .ok_or_else(|| bad_key("invalid ML-KEM-768 secret key"))?;
    let ciphertext = kem
        .ciphertext_from_bytes(encapsulated)
        .ok_or_else(|| bad_key("invalid ML-KEM-768 ciphertext"))?;
    let shared = kem.decapsulate(secret_key, ciphertext).map_err(backend)?;
    Ok(SecureBytes::new(shared.into_vec()))
}

#[async_trait]
impl CryptoProvider for LiboqsProvider {
    fn tier(&self) -> Option<Tier> {
        Some(Tier::LiboqsPqc)
    }

    fn supported_suites(&self) -> &[Suite] {
        &LIBOQS_SUITES
    }

    async fn generate_keypair(&self, suite: Suite, usage: KeyUsage) -> Result<KeyPair> {
        match (suite, usage) {
            (Suite::MlKem768MlDsa65, KeyUsage::KeyExchange) => {
                let kem = mlkem()?;
                let (public, secret) = kem.keypair().map_err(backend)?;
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.into_vec(),
                    secret: SecureBytes::new(secret.into_vec()),
                })
            }
            (Suite::XWingMlDsa65, KeyUsage::KeyExchange) => {
                let kem = mlkem()?;
                let (ml_public, ml_secret) = kem.keypair().map_err(backend)?;
                let x_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let x_public = x25519_dalek::PublicKey::from(&x_secret);

                let mut public = ml_public.into_vec();
                public.extend_from_slice(x_public.as_bytes());
                let mut secret = ml_secret.into_vec();
                secret.extend_from_slice(&x_secret.to_bytes());
                Ok(KeyPair { suite, usage, public, secret: SecureBytes::new(secret) })
            }
            (Suite::XWingMlDsa65 | Suite::MlKem768MlDsa65, KeyUsage::Signing) => {
                let sig = mldsa()?;
                let (public, secret) = sig.keypair().map_err(backend)?;
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.into_vec(),
                    secret: SecureBytes::new(secret.into_vec()),
                })
            }
            (Suite::X25519Ed25519 | Suite::P256Ecdsa, _) => {
                self.classic.generate_keypair(suite, usage).await
            }
            _ => Err(CryptoError::UnsupportedSuite(suite.wire_id())),
        }
    }

    async fn kem_encapsulate(&self, suite: Suite, recipient_public: &[u8]) -> Result<Encapsulation> {
        match suite {
            Suite::MlKem768MlDsa65 => {
                let (encapsulated_key, shared_secret) = mlkem_encapsulate(recipient_public)?;
                Ok(Encapsulation { encapsulated_key, shared_secret })
            }
            Suite::XWingMlDsa65 => {
                if recipient_public.len() != ML_KEM_768_PUBLIC_LEN + X25519_LEN {
                    return Err(bad_key("X-Wing public key has unexpected length"));
                }
                let (ml_public, x_public) = recipient_public.split_at(ML_KEM_768_PUBLIC_LEN);
                let (ciphertext, ml_shared) = mlkem_encapsulate(ml_public)?;
                let (ephemeral_public, x_shared) = classic::x25519_encapsulate(x_public)?;

                let shared_secret = xwing_combine(
                    ml_shared.as_ref(),
                    x_shared.as_ref(),
                    &ciphertext,
                    &ephemeral_public,
                    x_public,
                );
                let mut encapsulated_key = ciphertext;
                encapsulated_key.extend_from_slice(&ephemeral_public);
                Ok(Encapsulation { encapsulated_key, shared_secret })
            }
            Suite::X25519Ed25519 | Suite::P256Ecdsa => {
                self.classic.kem_encapsulate(suite, recipient_public).await
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
            Suite::MlKem768MlDsa65 => mlkem_decapsulate(encapsulated_key, secret.as_ref()),
            Suite::XWingMlDsa65 => {
                if encapsulated_key.len() != ML_KEM_768_CIPHERTEXT_LEN + X25519_LEN {
                    return Err(bad_key("X-Wing encapsulated key has unexpected length"));
                }
                if secret.len() < X25519_LEN {
                    return Err(bad_key("X-Wing secret key has unexpected length"));
                }
                let (ml_secret, x_secret) = secret.as_ref().split_at(secret.len() - X25519_LEN);
                let (ciphertext, ephemeral_public) =
                    encapsulated_key.split_at(ML_KEM_768_CIPHERTEXT_LEN);

                let ml_shared = mlkem_decapsulate(ciphertext, ml_secret)?;
                let x_shared = classic::x25519_agree(x_secret, ephemeral_public)?;
                let recipient_x_public = classic::x25519_public_of(x_secret)?;

                Ok(xwing_combine(
                    ml_shared.as_ref(),
                    x_shared.as_ref(),
                    ciphertext,
                    ephemeral_public,
                    &recipient_x_public,
                ))
            }
            Suite::X25519Ed25519 | Suite::P256Ecdsa => {
                self.classic.kem_decapsulate(suite, encapsulated_key, secret).await
            }
            _ => Err(CryptoError::UnsupportedSuite(suite.wire_id())),
        }
    }

    async fn sign(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        key: &SigningKeyHandle,
    ) -> Result<Vec<u8>> {
        match algorithm {
            SignatureAlgorithm::MlDsa65 => match key {
                SigningKeyHandle::Software(secret) => {
                    let sig = mldsa()?;
                    let secret_key = sig
                        .secret_key_from_bytes(secret.as_ref())
                        .ok_or_else(|| bad_key("invalid ML-DSA-65 secret key"))?;
                    let signature = sig
                        .sign(data, secret_key)
                        .map_err(|e| CryptoError::SigningFailed(format!("liboqs: {e}")))?;
                    Ok(signature.into_vec())
                }
                SigningKeyHandle::Callback(sign_fn) => sign_fn(data),
                SigningKeyHandle::SecureEnclaveRef(_) => Err(CryptoError::UnsupportedKeyHandle(
                    "ML-DSA-65 does not support secure enclave handles".to_string(),
                )),
            },
            _ => self.classic.sign(algorithm, data, key).await,
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
            SignatureAlgorithm::MlDsa65 => {
                let sig = mldsa()?;
                let public = sig
                    .public_key_from_bytes(public_key)
                    .ok_or_else(|| bad_key("invalid ML-DSA-65 public key"))?;
                let signature = sig.signature_from_bytes(signature).ok_or_else(|| {
                    CryptoError::InvalidSignatureFormat("malformed ML-DSA-65 signature".to_string())
                })?;
                Ok(sig.verify(data, signature, public).is_ok())
            }
            _ => self.classic.verify(algorithm, data, signature, public_key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mlkem_encap_decap_agree() {
        let provider = LiboqsProvider::new();
        let pair = provider
            .generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::KeyExchange)
            .await
            .unwrap();
        let encapsulation =
            provider.kem_encapsulate(Suite::MlKem768MlDsa65, &pair.public).await.unwrap();
        let recovered = provider
            .kem_decapsulate(Suite::MlKem768MlDsa65, &encapsulation.encapsulated_key, &pair.secret)
            .await
            .unwrap();
        assert_eq!(recovered, encapsulation.shared_secret);
    }

    #[tokio::test]
    async fn mldsa_sign_verify_round_trip() {
        let provider = LiboqsProvider::new();
        let pair =
            provider.generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::Signing).await.unwrap();
        let handle = SigningKeyHandle::Software(pair.secret.clone());
        let signature =
            provider.sign(SignatureAlgorithm::MlDsa65, b"message", &handle).await.unwrap();
        assert!(provider
            .verify(SignatureAlgorithm::MlDsa65, b"message", &signature, &pair.public)
            .await
            .unwrap());
    }
}
