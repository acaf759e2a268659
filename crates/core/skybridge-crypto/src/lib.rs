//! # SkyBridge Crypto
//!
//! Cryptographic provider abstraction for the SkyBridge P2P session core.
//!
//! The crate is organized around a tier-tagged [`provider::CryptoProvider`]
//! trait with concrete backends for the in-process PQC implementation, the
//! liboqs library, and classical elliptic-curve crypto, plus an unavailable
//! sentinel for strict-PQC policies on platforms without a PQC backend.
//!
//! Around the providers sit the pieces both they and the handshake need:
//! - The [`suite`] registry mapping 16-bit wire IDs to algorithm triples
//!   and their authoritative byte lengths.
//! - [`secure_bytes::SecureBytes`], a byte container with guaranteed
//!   zeroization on drop and an injectable wipe function.
//! - The bit-exact [`hpke`] sealed-box container and [`aead`] helpers.
//! - The [`identity`] key wire form shared by handshake messages and the
//!   trust store.

#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod hpke;
pub mod identity;
pub mod provider;
pub mod secure_bytes;
pub mod suite;

pub use aead::AeadAlgorithm;
pub use error::{CryptoError, ErrorSeverity, Result};
pub use hpke::{SealedBox, SealedBoxContext};
pub use identity::{IdentityPublicKeys, KeyMaterial, KeyPair, KeyUsage};
pub use provider::{
    select_provider, CapabilityProbe, CryptoProvider, DefaultEnvironment, Encapsulation,
    ProviderEnvironment, ProviderSelection, SelectionMode, SigningKeyHandle, Tier,
};
pub use secure_bytes::SecureBytes;
pub use suite::{SignatureAlgorithm, Suite, SuiteFamily};
