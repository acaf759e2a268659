//! Replay cache: a short-window set of recently seen handshake IDs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default TTL for handshake IDs.
pub const DEFAULT_REPLAY_TTL: Duration = Duration::from_secs(300);

/// Minimum interval between opportunistic prunes.
const PRUNE_INTERVAL: Duration = Duration::from_secs(1);

struct Inner {
    entries: HashMap<[u8; 32], Instant>,
    last_prune: Instant,
}

/// TTL'd set of handshake IDs. `register_if_new` is the only write
/// operation; a duplicate ID inside the window means a replayed handshake.
pub struct ReplayCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl ReplayCache {
    /// Creates a cache with the default 5-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_REPLAY_TTL)
    }

    /// Creates a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), last_prune: Instant::now() }),
            ttl,
        }
    }

    /// Registers a handshake ID. Returns `false` if the ID was already
    /// present within the TTL window.
    pub fn register_if_new(&self, handshake_id: [u8; 32]) -> bool {
        self.register_at(handshake_id, Instant::now())
    }

    fn register_at(&self, handshake_id: [u8; 32], now: Instant) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Opportunistic prune, at most once per second.
        if now.duration_since(inner.last_prune) >= PRUNE_INTERVAL {
            let ttl = self.ttl;
            let before = inner.entries.len();
            inner.entries.retain(|_, inserted| now.duration_since(*inserted) < ttl);
            inner.last_prune = now;
            let removed = before - inner.entries.len();
            if removed > 0 {
                debug!(removed, "replay cache pruned");
            }
        }

        match inner.entries.get(&handshake_id) {
            Some(inserted) if now.duration_since(*inserted) < self.ttl => false,
            _ => {
                inner.entries.insert(handshake_id, now);
                true
            }
        }
    }

    /// Number of tracked IDs, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_rejected() {
        let cache = ReplayCache::new();
        let id = [7u8; 32];
        assert!(cache.register_if_new(id));
        assert!(!cache.register_if_new(id));
        assert!(cache.register_if_new([8u8; 32]));
    }

    #[test]
    fn expired_id_registers_again() {
        let cache = ReplayCache::with_ttl(Duration::from_millis(50));
        let id = [1u8; 32];
        let start = Instant::now();
        assert!(cache.register_at(id, start));
        assert!(!cache.register_at(id, start + Duration::from_millis(10)));
        assert!(cache.register_at(id, start + Duration::from_millis(60)));
    }

    #[test]
    fn prune_is_rate_limited_but_eventually_drops() {
        let cache = ReplayCache::with_ttl(Duration::from_millis(10));
        let start = Instant::now();
        for i in 0..100u8 {
            let mut id = [0u8; 32];
            id[0] = i;
            cache.register_at(id, start);
        }
        assert_eq!(cache.len(), 100);
        // Past both the TTL and the prune interval, old entries vanish on
        // the next registration.
        cache.register_at([0xFF; 32], start + Duration::from_secs(2));
        assert_eq!(cache.len(), 1);
    }
}
