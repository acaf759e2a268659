//! In-process post-quantum provider: ML-KEM-768 and ML-DSA-65 via the
//! PQClean-based `pqcrypto` backends, with X-Wing hybrid support.
//!
//! Classic suites delegate to [`ClassicProvider`], so one provider instance
//! covers every negotiable suite.

use crate::error::{CryptoError, Result};
use crate::identity::{KeyPair, KeyUsage};
use crate::provider::classic::{self, ClassicProvider};
use crate::provider::{xwing_combine, CryptoProvider, Encapsulation, SigningKeyHandle, Tier};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};
use async_trait::async_trait;
use pqcrypto_mldsa::mldsa65;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use rand::rngs::OsRng;

const ML_KEM_768_PUBLIC_LEN: usize = 1184;
const ML_KEM_768_SECRET_LEN: usize = 2400;
const ML_KEM_768_CIPHERTEXT_LEN: usize = 1088;
const ML_DSA_65_SECRET_LEN: usize = 4032;
const X25519_LEN: usize = 32;

const NATIVE_SUITES: [Suite; 4] = [
    Suite::XWingMlDsa65,
    Suite::MlKem768MlDsa65,
    Suite::X25519Ed25519,
    Suite::P256Ecdsa,
];

/// Provider backed by the in-process ML-KEM/ML-DSA implementation.
#[derive(Debug, Default)]
pub struct NativePqcProvider {
    classic: ClassicProvider,
}

impl NativePqcProvider {
    /// Creates a native PQC provider.
    pub fn new() -> Self {
        Self { classic: ClassicProvider::new() }
    }
}

fn bad_key(msg: impl Into<String>) -> CryptoError {
    CryptoError::InvalidKeyFormat(msg.into())
}

fn mlkem_encapsulate(recipient_public: &[u8]) -> Result<(Vec<u8>, SecureBytes)> {
    if recipient_public.len() != ML_KEM_768_PUBLIC_LEN {
        return Err(bad_key(format!(
            "ML-KEM-768 public key must be {ML_KEM_768_PUBLIC_LEN} bytes, got {}",
            recipient_public.len()
        )));
    }
    let public = mlkem768::PublicKey::from_bytes(recipient_public)
        .map_err(|_| bad_key("invalid ML-KEM-768 public key"))?;
    let (shared, ciphertext) = mlkem768::encapsulate(&public);
    Ok((ciphertext.as_bytes().to_vec(), SecureBytes::from_slice(shared.as_bytes())))
}

fn mlkem_decapsulate(encapsulated: &[u8], secret: &[u8]) -> Result<SecureBytes> {
    if secret.len() != ML_KEM_768_SECRET_LEN {
        return Err(bad_key(
            "ML-KEM-768 decapsulation requires the expanded secret key form",
        ));
    }
    if encapsulated.len() != ML_KEM_768_CIPHERTEXT_LEN {
        return Err(bad_key(format!(
            "ML-KEM-768 ciphertext must be {ML_KEM_768_CIPHERTEXT_LEN} bytes, got {}",
            encapsulated.len()
        )));
    }
    let secret_key = mlkem768::SecretKey::from_bytes(secret)
        .map_err(|_| bad_key("invalid ML-KEM-768 secret key"))?;
    let ciphertext = mlkem768::Ciphertext::from_bytes(encapsulated)
        .map_err(|_| bad_key("invalid ML-KEM-768 ciphertext"))?;
    let shared = mlkem768::decapsulate(&ciphertext, &secret_key);
    Ok(SecureBytes::from_slice(shared.as_bytes()))
}

#[async_trait]
impl CryptoProvider for NativePqcProvider {
    fn tier(&self) -> Option<Tier> {
        Some(Tier::NativePqc)
    }

    fn supported_suites(&self) -> &[Suite] {
        &NATIVE_SUITES
    }

    async fn generate_keypair(&self, suite: Suite, usage: KeyUsage) -> Result<KeyPair> {
        match (suite, usage) {
            (Suite::MlKem768MlDsa65, KeyUsage::KeyExchange) => {
                let (public, secret) = mlkem768::keypair();
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.as_bytes().to_vec(),
                    secret: SecureBytes::from_slice(secret.as_bytes()),
                })
            }
            (Suite::XWingMlDsa65, KeyUsage::KeyExchange) => {
                let (ml_public, ml_secret) = mlkem768::keypair();
                let x_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let x_public = x25519_dalek::PublicKey::from(&x_secret);

                let mut public = ml_public.as_bytes().to_vec();
                public.extend_from_slice(x_public.as_bytes());
                let mut secret = ml_secret.as_bytes().to_vec();
                secret.extend_from_slice(&x_secret.to_bytes());
                Ok(KeyPair { suite, usage, public, secret: SecureBytes::new(secret) })
            }
            (Suite::XWingMlDsa65 | Suite::MlKem768MlDsa65, KeyUsage::Signing) => {
                let (public, secret) = mldsa65::keypair();
                Ok(KeyPair {
                    suite,
                    usage,
                    public: public.as_bytes().to_vec(),
                    secret: SecureBytes::from_slice(secret.as_bytes()),
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
                    return Err(bad_key(format!(
                        "X-Wing public key must be {} bytes, got {}",
                        ML_KEM_768_PUBLIC_LEN + X25519_LEN,
                        recipient_public.len()
                    )));
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
                if secret.len() != ML_KEM_768_SECRET_LEN + X25519_LEN {
                    return Err(bad_key("X-Wing secret key has unexpected length"));
                }
                if encapsulated_key.len() != ML_KEM_768_CIPHERTEXT_LEN + X25519_LEN {
                    return Err(bad_key(format!(
                        "X-Wing encapsulated key must be {} bytes, got {}",
                        ML_KEM_768_CIPHERTEXT_LEN + X25519_LEN,
                        encapsulated_key.len()
                    )));
                }
                let (ml_secret, x_secret) = secret.as_ref().split_at(ML_KEM_768_SECRET_LEN);
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
                    if secret.len() != ML_DSA_65_SECRET_LEN {
                        return Err(bad_key(
                            "ML-DSA-65 signing requires the expanded secret key form",
                        ));
                    }
                    let secret_key = mldsa65::SecretKey::from_bytes(secret.as_ref())
                        .map_err(|_| bad_key("invalid ML-DSA-65 secret key"))?;
                    Ok(mldsa65::detached_sign(data, &secret_key).as_bytes().to_vec())
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
                let public = mldsa65::PublicKey::from_bytes(public_key)
                    .map_err(|_| bad_key("invalid ML-DSA-65 public key"))?;
                let signature =
                    mldsa65::DetachedSignature::from_bytes(signature).map_err(|_| {
                        CryptoError::InvalidSignatureFormat(
                            "malformed ML-DSA-65 signature".to_string(),
                        )
                    })?;
                Ok(mldsa65::verify_detached_signature(&signature, data, &public).is_ok())
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
        let provider = NativePqcProvider::new();
        let pair = provider
            .generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::KeyExchange)
            .await
            .unwrap();
        assert_eq!(pair.public.len(), 1184);
        assert_eq!(pair.secret.len(), 2400);

        let encapsulation =
            provider.kem_encapsulate(Suite::MlKem768MlDsa65, &pair.public).await.unwrap();
        assert_eq!(encapsulation.encapsulated_key.len(), 1088);

        let recovered = provider
            .kem_decapsulate(Suite::MlKem768MlDsa65, &encapsulation.encapsulated_key, &pair.secret)
            .await
            .unwrap();
        assert_eq!(recovered, encapsulation.shared_secret);
    }

    #[tokio::test]
    async fn xwing_encap_decap_agree() {
        let provider = NativePqcProvider::new();
        let pair =
            provider.generate_keypair(Suite::XWingMlDsa65, KeyUsage::KeyExchange).await.unwrap();
        assert_eq!(pair.public.len(), 1216);
        assert_eq!(pair.secret.len(), 2432);

        let encapsulation =
            provider.kem_encapsulate(Suite::XWingMlDsa65, &pair.public).await.unwrap();
        assert_eq!(encapsulation.encapsulated_key.len(), 1120);

        let recovered = provider
            .kem_decapsulate(Suite::XWingMlDsa65, &encapsulation.encapsulated_key, &pair.secret)
            .await
            .unwrap();
        assert_eq!(recovered, encapsulation.shared_secret);
    }

    #[tokio::test]
    async fn mldsa_sign_verify_round_trip() {
        let provider = NativePqcProvider::new();
        let pair =
            provider.generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::Signing).await.unwrap();
        assert_eq!(pair.public.len(), 1952);

        let handle = SigningKeyHandle::Software(pair.secret.clone());
        let signature =
            provider.sign(SignatureAlgorithm::MlDsa65, b"message", &handle).await.unwrap();
        assert!(provider
            .verify(SignatureAlgorithm::MlDsa65, b"message", &signature, &pair.public)
            .await
            .unwrap());
        assert!(!provider
            .verify(SignatureAlgorithm::MlDsa65, b"tampered", &signature, &pair.public)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn mldsa_rejects_enclave_handle() {
        let provider = NativePqcProvider::new();
        let handle = SigningKeyHandle::SecureEnclaveRef(b"ref".to_vec());
        let err = provider.sign(SignatureAlgorithm::MlDsa65, b"m", &handle).await.unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedKeyHandle(_)));
    }

    #[tokio::test]
    async fn wrong_size_mlkem_key_rejected() {
        let provider = NativePqcProvider::new();
        let err = provider
            .kem_encapsulate(Suite::MlKem768MlDsa65, &[0u8; 1183])
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyFormat(_)));
    }

    #[tokio::test]
    async fn classic_suites_delegate() {
        let provider = NativePqcProvider::new();
        let pair = provider
            .generate_keypair(Suite::X25519Ed25519, KeyUsage::KeyExchange)
            .await
            .unwrap();
        assert_eq!(pair.public.len(), 32);
    }

    #[tokio::test]
    async fn hpke_seal_open_round_trip() {
        let provider = NativePqcProvider::new();
        let pair = provider
            .generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::KeyExchange)
            .await
            .unwrap();
        let sealed = provider
            .hpke_seal(Suite::MlKem768MlDsa65, &pair.public, b"aad", b"secret payload")
            .await
            .unwrap();
        let opened = provider
            .hpke_open(Suite::MlKem768MlDsa65, &pair.secret, &sealed, b"aad")
            .await
            .unwrap();
        assert_eq!(opened, b"secret payload");
    }
}
