//! Error types for the trust store.

use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors from trust record handling and persistence.
#[derive(Error, Debug)]
pub enum TrustError {
    /// No record exists for the device.
    #[error("no trust record for device {0}")]
    RecordNotFound(String),

    /// The device has a tombstone; re-adding requires a new device ID.
    #[error("device {0} is revoked; key rotation requires a new device id")]
    Tombstoned(String),

    /// The record signature did not verify.
    #[error("trust record signature invalid for device {0}")]
    SignatureInvalid(String),

    /// An identifier matched more than one record.
    #[error("identifier {0} is ambiguous")]
    AmbiguousIdentifier(String),

    /// The persistence backend failed.
    #[error("keychain storage failure: {0}")]
    Storage(String),

    /// Record serialization failed.
    #[error("record serialization failed: {0}")]
    Serialization(String),

    /// An underlying crypto operation failed.
    #[error(transparent)]
    Crypto(#[from] skybridge_crypto::CryptoError),
}
