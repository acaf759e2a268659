//! Error types for cryptographic operations.

use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors surfaced by providers and crypto containers.
///
/// Parser-level rejects of malformed inputs (`InvalidKeyFormat`,
/// `InvalidSignatureFormat`, `SealedBoxInvalid`) are terminal for the
/// current operation; they are never collapsed into a `false` verification
/// result.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The requested provider tier cannot be constructed.
    #[error("crypto provider not available: {0}")]
    ProviderNotAvailable(String),

    /// The backend rejected key generation inputs.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// A key did not match the expected format or length for its suite.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// A signature blob did not match the expected format for its algorithm.
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    /// A sealed box failed structural validation.
    #[error("invalid sealed box: {0}")]
    SealedBoxInvalid(String),

    /// The signing-key handle kind is not usable with this algorithm.
    #[error("unsupported key handle: {0}")]
    UnsupportedKeyHandle(String),

    /// The suite is unknown or not supported by this provider.
    #[error("unsupported suite {0:#06x}")]
    UnsupportedSuite(u16),

    /// KEM encapsulation or decapsulation failed.
    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// Signing failed in the backend.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// AEAD sealing failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// AEAD opening failed (tag mismatch or malformed input).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The system random number generator failed. There is no fallback.
    #[error("random generation failed")]
    RandomGenerationFailed,
}

impl CryptoError {
    /// Severity classification for observability.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CryptoError::RandomGenerationFailed => ErrorSeverity::Critical,
            CryptoError::ProviderNotAvailable(_) => ErrorSeverity::Major,
            CryptoError::DecryptionFailed(_) => ErrorSeverity::Major,
            CryptoError::KeyExchangeFailed(_) => ErrorSeverity::Major,
            _ => ErrorSeverity::Minor,
        }
    }

    /// Classifies the error for metrics without revealing details.
    pub fn observable_type(&self) -> &'static str {
        match self {
            CryptoError::ProviderNotAvailable(_) => "provider_unavailable",
            CryptoError::KeyGenerationFailed(_) => "key_generation",
            CryptoError::InvalidKeyFormat(_) => "key_format",
            CryptoError::InvalidSignatureFormat(_) => "signature_format",
            CryptoError::SealedBoxInvalid(_) => "sealed_box",
            CryptoError::UnsupportedKeyHandle(_) => "key_handle",
            CryptoError::UnsupportedSuite(_) => "suite",
            CryptoError::KeyExchangeFailed(_) => "key_exchange",
            CryptoError::SigningFailed(_) => "signing",
            CryptoError::EncryptionFailed(_) => "encryption",
            CryptoError::DecryptionFailed(_) => "decryption",
            CryptoError::RandomGenerationFailed => "rng",
        }
    }
}

/// Error severity levels for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention.
    Critical,
    /// Major errors that impact functionality.
    Major,
    /// Minor errors that can be recovered from.
    Minor,
}
