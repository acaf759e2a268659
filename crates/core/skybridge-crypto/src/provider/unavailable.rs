//! Sentinel provider used when policy requires PQC but no PQC backend is
//! available. Every operation fails with `ProviderNotAvailable`.

use crate::error::{CryptoError, Result};
use crate::identity::{KeyPair, KeyUsage};
use crate::provider::{CryptoProvider, Encapsulation, SigningKeyHandle, Tier};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};
use async_trait::async_trait;

/// The unavailable sentinel.
#[derive(Debug, Default)]
pub struct UnavailableProvider;

impl UnavailableProvider {
    /// Creates the sentinel.
    pub fn new() -> Self {
        Self
    }

    fn unavailable<T>(&self) -> Result<T> {
        Err(CryptoError::ProviderNotAvailable(
            "post-quantum cryptography required by policy but not available".to_string(),
        ))
    }
}

#[async_trait]
impl CryptoProvider for UnavailableProvider {
    fn tier(&self) -> Option<Tier> {
        None
    }

    fn supported_suites(&self) -> &[Suite] {
        &[]
    }

    async fn generate_keypair(&self, _suite: Suite, _usage: KeyUsage) -> Result<KeyPair> {
        self.unavailable()
    }

    async fn kem_encapsulate(
        &self,
        _suite: Suite,
        _recipient_public: &[u8],
    ) -> Result<Encapsulation> {
        self.unavailable()
    }

    async fn kem_decapsulate(
        &self,
        _suite: Suite,
        _encapsulated_key: &[u8],
        _secret: &SecureBytes,
    ) -> Result<SecureBytes> {
        self.unavailable()
    }

    async fn sign(
        &self,
        _algorithm: SignatureAlgorithm,
        _data: &[u8],
        _key: &SigningKeyHandle,
    ) -> Result<Vec<u8>> {
        self.unavailable()
    }

    async fn verify(
        &self,
        _algorithm: SignatureAlgorithm,
        _data: &[u8],
        _signature: &[u8],
        _public_key: &[u8],
    ) -> Result<bool> {
        self.unavailable()
    }
}
