//! In-memory fallback cache of peer KEM public keys.
//!
//! When the trust store is degraded or stale, the session manager consults
//! this cache (fed by pairing identity exchange messages) to decide whether
//! a rekey to PQC is possible. Purely in-memory; nothing here persists.

use crate::record::KemPublicKeyInfo;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Alias-indexed map of peer KEM public keys.
#[derive(Debug, Default)]
pub struct BootstrapKemCache {
    entries: RwLock<HashMap<String, Vec<KemPublicKeyInfo>>>,
}

impl BootstrapKemCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records KEM keys under every known alias of a peer.
    pub fn insert(&self, aliases: &[String], keys: Vec<KemPublicKeyInfo>) {
        if keys.is_empty() {
            return;
        }
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for alias in aliases {
            entries.insert(alias.clone(), keys.clone());
        }
        debug!(aliases = aliases.len(), keys = keys.len(), "bootstrap KEM cache updated");
    }

    /// Looks up KEM keys by any of the given alias candidates.
    pub fn get(&self, candidates: &[String]) -> Option<Vec<KemPublicKeyInfo>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        candidates.iter().find_map(|alias| entries.get(alias).cloned())
    }

    /// Drops every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u16) -> KemPublicKeyInfo {
        KemPublicKeyInfo { suite_wire_id: id, public_key: vec![id as u8; 4] }
    }

    #[test]
    fn insert_under_all_aliases() {
        let cache = BootstrapKemCache::new();
        cache.insert(
            &["dev-1".to_string(), "bonjour:desk@local".to_string()],
            vec![key(0x0101)],
        );
        assert!(cache.get(&["bonjour:desk@local".to_string()]).is_some());
        assert!(cache.get(&["dev-1".to_string()]).is_some());
        assert!(cache.get(&["dev-2".to_string()]).is_none());
    }

    #[test]
    fn first_matching_candidate_wins() {
        let cache = BootstrapKemCache::new();
        cache.insert(&["a".to_string()], vec![key(0x0001)]);
        cache.insert(&["b".to_string()], vec![key(0x0101)]);
        let found = cache.get(&["missing".to_string(), "b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(found[0].suite_wire_id, 0x0101);
    }

    #[test]
    fn empty_key_lists_are_ignored() {
        let cache = BootstrapKemCache::new();
        cache.insert(&["a".to_string()], Vec::new());
        assert!(cache.get(&["a".to_string()]).is_none());
    }
}
