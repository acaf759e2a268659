//! # SkyBridge Trust
//!
//! The trust and identity substrate for the SkyBridge P2P session core:
//! signed per-peer [`record::TrustRecord`]s with add/revoke semantics,
//! revoke-dominates last-writer-wins conflict resolution, 30-day tombstone
//! garbage collection, keychain persistence, and the in-memory
//! [`bootstrap_cache::BootstrapKemCache`] used when the store lacks a
//! peer's KEM identity.

#![warn(missing_docs)]

pub mod bootstrap_cache;
pub mod error;
pub mod keychain;
pub mod record;
pub mod store;

pub use bootstrap_cache::BootstrapKemCache;
pub use error::{Result, TrustError};
pub use keychain::{canonical_json, KeychainStore, MemoryKeychain, TRUST_SERVICE};
pub use record::{
    resolve_conflict, AttestationLevel, KemPublicKeyInfo, RecordType, TrustRecord,
};
pub use store::{LocalSigner, NewTrustedPeer, TrustStore, TOMBSTONE_RETENTION_DAYS};
