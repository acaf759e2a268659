//! Keychain persistence for trust records.
//!
//! Records persist under service `com.skybridge.p2p.trust`, account
//! `trust_record_<deviceId>`, as deterministic sorted-key JSON with
//! millisecond-epoch dates. The synchronizable attribute is set iff the
//! cloud keychain is available.

use crate::error::{Result, TrustError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

/// Keychain service name for trust records.
pub const TRUST_SERVICE: &str = "com.skybridge.p2p.trust";

/// Account name for a device's trust record.
pub fn account_for(device_id: &str) -> String {
    format!("trust_record_{device_id}")
}

/// Serializes a value as deterministic JSON with sorted keys.
///
/// Going through `serde_json::Value` puts every object into a sorted map,
/// so the output is byte-identical regardless of struct field order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value =
        serde_json::to_value(value).map_err(|e| TrustError::Serialization(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| TrustError::Serialization(e.to_string()))
}

/// Abstract keychain backend.
///
/// The platform keychain (or any other secret store) sits behind this
/// trait; the in-memory implementation backs tests and ephemeral setups.
pub trait KeychainStore: Send + Sync {
    /// Stores a value, replacing any existing entry.
    fn put(&self, service: &str, account: &str, value: &[u8], synchronizable: bool) -> Result<()>;

    /// Reads a value.
    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes an entry if present.
    fn delete(&self, service: &str, account: &str) -> Result<()>;

    /// Lists all (account, value) pairs under a service.
    fn list(&self, service: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether the cloud keychain is available for synchronizable entries.
    fn cloud_sync_available(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    #[allow(dead_code)]
    synchronizable: bool,
}

/// In-memory keychain.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entries: RwLock<HashMap<(String, String), Entry>>,
    cloud_available: bool,
}

impl MemoryKeychain {
    /// Creates an in-memory keychain without cloud sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory keychain that reports cloud sync availability.
    pub fn with_cloud_sync() -> Self {
        Self { entries: RwLock::new(HashMap::new()), cloud_available: true }
    }
}

impl KeychainStore for MemoryKeychain {
    fn put(&self, service: &str, account: &str, value: &[u8], synchronizable: bool) -> Result<()> {
        let mut entries =
            self.entries.write().map_err(|_| TrustError::Storage("lock poisoned".to_string()))?;
        entries.insert(
            (service.to_string(), account.to_string()),
            Entry { value: value.to_vec(), synchronizable },
        );
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>> {
        let entries =
            self.entries.read().map_err(|_| TrustError::Storage("lock poisoned".to_string()))?;
        Ok(entries.get(&(service.to_string(), account.to_string())).map(|e| e.value.clone()))
    }

    fn delete(&self, service: &str, account: &str) -> Result<()> {
        let mut entries =
            self.entries.write().map_err(|_| TrustError::Storage("lock poisoned".to_string()))?;
        entries.remove(&(service.to_string(), account.to_string()));
        Ok(())
    }

    fn list(&self, service: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries =
            self.entries.read().map_err(|_| TrustError::Storage("lock poisoned".to_string()))?;
        Ok(entries
            .iter()
            .filter(|((s, _), _)| s == service)
            .map(|((_, account), entry)| (account.clone(), entry.value.clone()))
            .collect())
    }

    fn cloud_sync_available(&self) -> bool {
        self.cloud_available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct Unsorted {
            zebra: u32,
            alpha: u32,
            mid: u32,
        }
        let json = canonical_json(&Unsorted { zebra: 1, alpha: 2, mid: 3 }).unwrap();
        assert_eq!(json, r#"{"alpha":2,"mid":3,"zebra":1}"#);
    }

    #[test]
    fn memory_keychain_round_trip() {
        let keychain = MemoryKeychain::new();
        keychain.put(TRUST_SERVICE, &account_for("dev-1"), b"payload", false).unwrap();
        assert_eq!(
            keychain.get(TRUST_SERVICE, &account_for("dev-1")).unwrap(),
            Some(b"payload".to_vec())
        );
        keychain.delete(TRUST_SERVICE, &account_for("dev-1")).unwrap();
        assert_eq!(keychain.get(TRUST_SERVICE, &account_for("dev-1")).unwrap(), None);
    }

    #[test]
    fn list_filters_by_service() {
        let keychain = MemoryKeychain::new();
        keychain.put(TRUST_SERVICE, "a", b"1", false).unwrap();
        keychain.put("other.service", "b", b"2", false).unwrap();
        let listed = keychain.list(TRUST_SERVICE).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "a");
    }
}
