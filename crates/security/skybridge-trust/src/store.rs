//! The trust store: signed add/revoke records, conflict resolution,
//! tombstone GC, and peer identifier resolution.

use crate::error::{Result, TrustError};
use crate::keychain::{account_for, canonical_json, KeychainStore, TRUST_SERVICE};
use crate::record::{
    resolve_conflict, AttestationLevel, KemPublicKeyInfo, RecordType, TrustRecord,
};
use chrono::{DateTime, Duration, Utc};
use skybridge_crypto::{CryptoProvider, SignatureAlgorithm, SigningKeyHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Tombstones are garbage-collected this long after `revoked_at`.
pub const TOMBSTONE_RETENTION_DAYS: i64 = 30;

/// Identifier prefixes stripped while resolving a peer.
const STRIP_PREFIXES: [&str; 5] = ["recent:", "id:", "mac:bonjour:", "fp:", "name:"];

/// The local device's signing identity, used to sign every record.
#[derive(Clone)]
pub struct LocalSigner {
    /// Signature algorithm of the identity key.
    pub algorithm: SignatureAlgorithm,
    /// The identity public key.
    pub public_key: Vec<u8>,
    /// Handle to the identity private key.
    pub handle: SigningKeyHandle,
}

/// Inputs for trusting a new peer.
#[derive(Debug, Clone)]
pub struct NewTrustedPeer {
    /// Stable device identifier.
    pub device_id: String,
    /// The peer's identity public key.
    pub public_key: Vec<u8>,
    /// Optional Secure Enclave public key.
    pub secure_enclave_public_key: Option<Vec<u8>>,
    /// The peer's KEM public keys.
    pub kem_public_keys: Vec<KemPublicKeyInfo>,
    /// Attestation level tag.
    pub attestation_level: AttestationLevel,
    /// Peer capability strings.
    pub capabilities: Vec<String>,
    /// Display name.
    pub device_name: Option<String>,
}

/// Persisted per-peer trust state.
///
/// Writes are serialized through the interior lock; reads hand out cloned
/// snapshots. All mutations are signed records.
pub struct TrustStore {
    records: RwLock<HashMap<String, TrustRecord>>,
    keychain: Arc<dyn KeychainStore>,
    provider: Arc<dyn CryptoProvider>,
    signer: LocalSigner,
}

impl TrustStore {
    /// Opens the store, loading any persisted records.
    pub fn open(
        keychain: Arc<dyn KeychainStore>,
        provider: Arc<dyn CryptoProvider>,
        signer: LocalSigner,
    ) -> Result<Self> {
        let mut records = HashMap::new();
        for (account, value) in keychain.list(TRUST_SERVICE)? {
            match serde_json::from_slice::<TrustRecord>(&value) {
                Ok(record) => {
                    records.insert(record.device_id.clone(), record);
                }
                Err(e) => warn!(account, error = %e, "skipping undecodable trust record"),
            }
        }
        info!(count = records.len(), "trust store loaded");
        Ok(Self { records: RwLock::new(records), keychain, provider, signer })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, TrustRecord>>> {
        self.records.read().map_err(|_| TrustError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, TrustRecord>>> {
        self.records.write().map_err(|_| TrustError::Storage("lock poisoned".to_string()))
    }

    async fn sign_record(&self, record: &mut TrustRecord) -> Result<()> {
        let preimage = record.signing_preimage();
        record.signature =
            self.provider.sign(self.signer.algorithm, &preimage, &self.signer.handle).await?;
        Ok(())
    }

    /// Verifies a record signature against the local identity key.
    pub async fn verify_record(&self, record: &TrustRecord) -> Result<()> {
        let preimage = record.signing_preimage();
        let valid = self
            .provider
            .verify(self.signer.algorithm, &preimage, &record.signature, &self.signer.public_key)
            .await?;
        if valid {
            Ok(())
        } else {
            Err(TrustError::SignatureInvalid(record.device_id.clone()))
        }
    }

    fn persist(&self, record: &TrustRecord) -> Result<()> {
        let json = canonical_json(record)?;
        self.keychain.put(
            TRUST_SERVICE,
            &account_for(&record.device_id),
            json.as_bytes(),
            self.keychain.cloud_sync_available(),
        )
    }

    /// Adds (or re-signs an update of) a trusted peer.
    ///
    /// A tombstone for the device blocks re-adding; key rotation must use a
    /// fresh device ID.
    pub async fn add(&self, peer: NewTrustedPeer) -> Result<TrustRecord> {
        let (version, created_at) = {
            let records = self.read()?;
            match records.get(&peer.device_id) {
                Some(existing) if existing.is_tombstone() => {
                    return Err(TrustError::Tombstoned(peer.device_id));
                }
                Some(existing) => (existing.version + 1, existing.created_at),
                None => (1, Utc::now()),
            }
        };

        let now = Utc::now();
        let mut record = TrustRecord {
            device_id: peer.device_id.clone(),
            pub_key_fingerprint: TrustRecord::fingerprint_of(&peer.public_key),
            public_key: peer.public_key,
            secure_enclave_public_key: peer.secure_enclave_public_key,
            kem_public_keys: peer.kem_public_keys,
            attestation_level: peer.attestation_level,
            capabilities: peer.capabilities,
            created_at,
            updated_at: now,
            version,
            signature: Vec::new(),
            record_type: RecordType::Add,
            revoked_at: None,
            device_name: peer.device_name,
        };
        self.sign_record(&mut record).await?;
        self.persist(&record)?;
        self.write()?.insert(record.device_id.clone(), record.clone());
        info!(device_id = %record.device_id, version = record.version, "trust record added");
        Ok(record)
    }

    /// Revokes a peer, writing a tombstone derived from the latest add.
    pub async fn revoke(&self, device_id: &str) -> Result<TrustRecord> {
        let latest = self
            .read()?
            .get(device_id)
            .cloned()
            .ok_or_else(|| TrustError::RecordNotFound(device_id.to_string()))?;

        let now = Utc::now();
        let mut tombstone = TrustRecord {
            record_type: RecordType::Revoke,
            revoked_at: Some(now),
            updated_at: now,
            version: latest.version + 1,
            signature: Vec::new(),
            ..latest
        };
        self.sign_record(&mut tombstone).await?;
        self.persist(&tombstone)?;
        self.write()?.insert(tombstone.device_id.clone(), tombstone.clone());
        info!(device_id, "trust record revoked");
        Ok(tombstone)
    }

    /// Key rotation: revoke the old device ID and add the peer under a new
    /// one in a single call.
    pub async fn rotate(&self, old_device_id: &str, replacement: NewTrustedPeer) -> Result<TrustRecord> {
        self.revoke(old_device_id).await?;
        self.add(replacement).await
    }

    /// Returns the record for a device ID, tombstones included.
    pub fn get(&self, device_id: &str) -> Option<TrustRecord> {
        self.read().ok()?.get(device_id).cloned()
    }

    /// All records, tombstones included.
    pub fn list(&self) -> Vec<TrustRecord> {
        self.read().map(|r| r.values().cloned().collect()).unwrap_or_default()
    }

    /// The live (non-tombstone) KEM keys for a device, if any.
    pub fn kem_keys_for(&self, device_id: &str) -> Vec<KemPublicKeyInfo> {
        self.get(device_id)
            .filter(|r| !r.is_tombstone())
            .map(|r| r.kem_public_keys)
            .unwrap_or_default()
    }

    /// Merges a record arriving from sync, applying revoke-dominates then
    /// last-writer-wins, and persists the outcome.
    pub async fn merge_remote(&self, remote: TrustRecord) -> Result<TrustRecord> {
        self.verify_record(&remote).await?;
        let merged = {
            let records = self.read()?;
            match records.get(&remote.device_id) {
                Some(local) => resolve_conflict(local.clone(), remote),
                None => remote,
            }
        };
        self.persist(&merged)?;
        self.write()?.insert(merged.device_id.clone(), merged.clone());
        debug!(device_id = %merged.device_id, tombstone = merged.is_tombstone(), "merged remote record");
        Ok(merged)
    }

    /// Deletes tombstones older than the retention window. Returns how many
    /// were collected.
    pub fn gc_tombstones(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(TOMBSTONE_RETENTION_DAYS);
        let expired: Vec<String> = self
            .read()?
            .values()
            .filter(|r| r.is_tombstone() && r.revoked_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|r| r.device_id.clone())
            .collect();
        for device_id in &expired {
            self.keychain.delete(TRUST_SERVICE, &account_for(device_id))?;
            self.write()?.remove(device_id);
            debug!(device_id = %device_id, "tombstone collected");
        }
        Ok(expired.len())
    }

    /// Resolves an incoming peer identifier to a record through the
    /// candidate chain: raw ID, stripped prefixes, normalized Bonjour form,
    /// fingerprint, display name.
    ///
    /// Returns `Ok(None)` when nothing matches and an error when the
    /// identifier is ambiguous.
    pub fn lookup(&self, identifier: &str) -> Result<Option<TrustRecord>> {
        let candidates = candidate_chain(identifier);
        let records = self.read()?;

        let mut matched: Vec<&TrustRecord> = Vec::new();
        for record in records.values() {
            let is_match = candidates.iter().any(|c| {
                c == &record.device_id
                    || c == &record.pub_key_fingerprint
                    || record.device_name.as_deref() == Some(c.as_str())
            });
            if is_match {
                matched.push(record);
            }
        }

        match matched.len() {
            0 => Ok(None),
            1 => Ok(Some(matched[0].clone())),
            _ => Err(TrustError::AmbiguousIdentifier(identifier.to_string())),
        }
    }
}

/// Builds the ordered candidate list for an identifier.
fn candidate_chain(identifier: &str) -> Vec<String> {
    let mut candidates = vec![identifier.to_string()];
    for prefix in STRIP_PREFIXES {
        if let Some(stripped) = identifier.strip_prefix(prefix) {
            candidates.push(stripped.to_string());
        }
    }
    // Normalized Bonjour form for "<name>@<domain>"-shaped identifiers.
    if identifier.contains('@') && !identifier.starts_with("bonjour:") {
        candidates.push(format!("bonjour:{identifier}"));
    }
    if let Some(stripped) = identifier.strip_prefix("bonjour:") {
        candidates.push(stripped.to_string());
    }
    candidates.dedup();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::MemoryKeychain;
    use skybridge_crypto::provider::ClassicProvider;
    use skybridge_crypto::{KeyUsage, Suite};

    async fn test_store() -> TrustStore {
        let provider: Arc<dyn CryptoProvider> = Arc::new(ClassicProvider::new());
        let pair = provider
            .generate_keypair(Suite::X25519Ed25519, KeyUsage::Signing)
            .await
            .unwrap();
        let signer = LocalSigner {
            algorithm: SignatureAlgorithm::Ed25519,
            public_key: pair.public.clone(),
            handle: SigningKeyHandle::Software(pair.secret.clone()),
        };
        TrustStore::open(Arc::new(MemoryKeychain::new()), provider, signer).unwrap()
    }

    fn peer(device_id: &str) -> NewTrustedPeer {
        NewTrustedPeer {
            device_id: device_id.to_string(),
            public_key: vec![0xAB; 32],
            secure_enclave_public_key: None,
            kem_public_keys: vec![KemPublicKeyInfo {
                suite_wire_id: 0x0101,
                public_key: vec![0xCD; 8],
            }],
            attestation_level: AttestationLevel::None,
            capabilities: vec!["pqc".to_string()],
            device_name: Some("Desk Mac".to_string()),
        }
    }

    #[tokio::test]
    async fn add_signs_and_persists() {
        let store = test_store().await;
        let record = store.add(peer("dev-1")).await.unwrap();
        assert_eq!(record.version, 1);
        store.verify_record(&record).await.unwrap();
        assert_eq!(store.kem_keys_for("dev-1").len(), 1);
    }

    #[tokio::test]
    async fn tombstone_blocks_re_add() {
        let store = test_store().await;
        store.add(peer("dev-1")).await.unwrap();
        let tombstone = store.revoke("dev-1").await.unwrap();
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.version, 2);

        let err = store.add(peer("dev-1")).await.unwrap_err();
        assert!(matches!(err, TrustError::Tombstoned(_)));
        assert!(store.kem_keys_for("dev-1").is_empty());
    }

    #[tokio::test]
    async fn rotation_revokes_old_and_adds_new() {
        let store = test_store().await;
        store.add(peer("dev-1")).await.unwrap();
        let rotated = store.rotate("dev-1", peer("dev-2")).await.unwrap();
        assert_eq!(rotated.device_id, "dev-2");
        assert!(store.get("dev-1").unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn remote_tombstone_dominates_newer_local_add() {
        let store = test_store().await;
        let mut local = store.add(peer("dev-1")).await.unwrap();
        local.version = 3;

        // Build a remote tombstone one second older than the local add.
        let mut remote = local.clone();
        remote.record_type = RecordType::Revoke;
        remote.version = 2;
        remote.updated_at = local.updated_at - Duration::seconds(1);
        remote.revoked_at = Some(remote.updated_at);
        store.sign_record(&mut remote).await.unwrap();

        let merged = store.merge_remote(remote.clone()).await.unwrap();
        assert!(merged.is_tombstone());
        assert_eq!(merged.revoked_at, remote.revoked_at);
        assert!(store.get("dev-1").unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn forged_remote_record_rejected() {
        let store = test_store().await;
        let mut remote = store.add(peer("dev-1")).await.unwrap();
        remote.capabilities.push("injected".to_string());
        let err = store.merge_remote(remote).await.unwrap_err();
        assert!(matches!(err, TrustError::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn gc_removes_expired_tombstones() {
        let store = test_store().await;
        store.add(peer("dev-1")).await.unwrap();
        store.revoke("dev-1").await.unwrap();

        // Not yet expired.
        assert_eq!(store.gc_tombstones(Utc::now()).unwrap(), 0);
        let later = Utc::now() + Duration::days(TOMBSTONE_RETENTION_DAYS + 1);
        assert_eq!(store.gc_tombstones(later).unwrap(), 1);
        assert!(store.get("dev-1").is_none());
    }

    #[tokio::test]
    async fn lookup_resolves_prefixed_and_named_identifiers() {
        let store = test_store().await;
        let record = store.add(peer("dev-1")).await.unwrap();

        for identifier in ["dev-1", "recent:dev-1", "id:dev-1", "name:Desk Mac", "Desk Mac"] {
            let found = store.lookup(identifier).unwrap().unwrap();
            assert_eq!(found.device_id, "dev-1");
        }
        let by_fp = store.lookup(&record.pub_key_fingerprint).unwrap().unwrap();
        assert_eq!(by_fp.device_id, "dev-1");
        assert!(store.lookup("unknown-thing").unwrap().is_none());
    }

    #[tokio::test]
    async fn ambiguous_identifier_is_an_error() {
        let store = test_store().await;
        let mut a = peer("dev-1");
        a.device_name = Some("Shared Name".to_string());
        let mut b = peer("dev-2");
        b.device_name = Some("Shared Name".to_string());
        store.add(a).await.unwrap();
        store.add(b).await.unwrap();

        let err = store.lookup("Shared Name").unwrap_err();
        assert!(matches!(err, TrustError::AmbiguousIdentifier(_)));
    }

    #[tokio::test]
    async fn reload_from_keychain() {
        let keychain = Arc::new(MemoryKeychain::new());
        let provider: Arc<dyn CryptoProvider> = Arc::new(ClassicProvider::new());
        let pair =
            provider.generate_keypair(Suite::X25519Ed25519, KeyUsage::Signing).await.unwrap();
        let signer = LocalSigner {
            algorithm: SignatureAlgorithm::Ed25519,
            public_key: pair.public.clone(),
            handle: SigningKeyHandle::Software(pair.secret.clone()),
        };

        let store =
            TrustStore::open(keychain.clone(), provider.clone(), signer.clone()).unwrap();
        store.add(peer("dev-1")).await.unwrap();
        drop(store);

        let reopened = TrustStore::open(keychain, provider, signer).unwrap();
        assert!(reopened.get("dev-1").is_some());
    }
}
