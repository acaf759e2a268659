//! Session and PAKE configuration.

use serde::{Deserialize, Serialize};
use skybridge_crypto::Suite;
use std::time::Duration;

/// Session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// End-to-end handshake deadline.
    pub handshake_timeout: Duration,

    /// How long to wait for the peer's KEM keys during bootstrap-assisted
    /// recovery.
    pub bootstrap_kem_key_timeout: Duration,

    /// Replay cache TTL for handshake IDs.
    pub replay_ttl: Duration,

    /// Suites offered in MessageA, in priority order.
    pub offered_suites: Vec<Suite>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            bootstrap_kem_key_timeout: Duration::from_secs(10),
            replay_ttl: Duration::from_secs(300),
            // P-256 stays out of the default offer; it is a compatibility
            // suite negotiated only when explicitly configured.
            offered_suites: vec![
                Suite::XWingMlDsa65,
                Suite::MlKem768MlDsa65,
                Suite::X25519Ed25519,
            ],
        }
    }
}

/// PAKE rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PakeConfig {
    /// Failed attempts before lockout.
    pub max_attempts: u32,

    /// Base backoff delay.
    pub base_backoff: Duration,

    /// Backoff ceiling.
    pub max_backoff: Duration,

    /// Lockout duration after `max_attempts` failures.
    pub lockout_duration: Duration,

    /// Hard cap on combined attempt and lockout records.
    pub max_records: usize,

    /// Minimum interval between opportunistic cleanups.
    pub cleanup_interval: Duration,

    /// Attempt records older than this are dropped during cleanup.
    pub attempt_ttl: Duration,
}

impl Default for PakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            lockout_duration: Duration::from_secs(300),
            max_records: 50_000,
            cleanup_interval: Duration::from_secs(60),
            attempt_ttl: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.replay_ttl, Duration::from_secs(300));
        assert_eq!(config.offered_suites.len(), 3);
        assert!(!config.offered_suites.contains(&Suite::P256Ecdsa));

        let pake = PakeConfig::default();
        assert_eq!(pake.max_records, 50_000);
        assert_eq!(pake.cleanup_interval, Duration::from_secs(60));
        assert_eq!(pake.attempt_ttl, Duration::from_secs(600));
    }
}
