//! Bounded-memory rate limiting for pairing attempts.
//!
//! Per-identifier state with exponential backoff and lockout. Hard
//! invariants: the combined record count never exceeds the configured cap
//! (the 10 % oldest by failure time are evicted at the limit), cleanup
//! runs opportunistically at most once per interval, and a successful
//! pairing clears both record kinds for the identifier.

use crate::config::PakeConfig;
use crate::pake::PakeError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    failed_attempts: u32,
    last_failure: Instant,
    backoff_level: u32,
}

#[derive(Debug, Clone, Copy)]
struct LockoutRecord {
    since: Instant,
}

#[derive(Debug)]
struct LimiterState {
    attempts: HashMap<String, AttemptRecord>,
    lockouts: HashMap<String, LockoutRecord>,
    last_cleanup: Instant,
}

/// The PAKE rate limiter. A single serial context; the sole writer of its
/// state.
pub struct PakeRateLimiter {
    config: PakeConfig,
    state: Mutex<LimiterState>,
}

impl PakeRateLimiter {
    /// Creates a limiter.
    pub fn new(config: PakeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                attempts: HashMap::new(),
                lockouts: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn backoff_delay(&self, level: u32) -> Duration {
        let factor = 1u64 << level.min(20);
        self.config.base_backoff.saturating_mul(factor as u32).min(self.config.max_backoff)
    }

    /// Checks whether an attempt for the identifier is currently allowed.
    pub fn check(&self, identifier: &str) -> Result<(), PakeError> {
        self.check_at(identifier, Instant::now())
    }

    pub(crate) fn check_at(&self, identifier: &str, now: Instant) -> Result<(), PakeError> {
        let mut state = self.lock();
        Self::cleanup_if_due(&mut state, &self.config, now);

        if let Some(lockout) = state.lockouts.get(identifier) {
            let elapsed = now.duration_since(lockout.since);
            if elapsed < self.config.lockout_duration {
                return Err(PakeError::LockedOut {
                    remaining: self.config.lockout_duration - elapsed,
                });
            }
            // Lockout served; the identifier starts fresh.
            state.lockouts.remove(identifier);
            state.attempts.remove(identifier);
        }

        if let Some(record) = state.attempts.get(identifier) {
            let next_allowed = record.last_failure + self.backoff_delay(record.backoff_level);
            if now < next_allowed {
                return Err(PakeError::RateLimited { retry_after: next_allowed - now });
            }
        }
        Ok(())
    }

    /// Records a failed attempt. Returns `true` when the identifier just
    /// entered lockout.
    pub fn record_failure(&self, identifier: &str) -> bool {
        self.record_failure_at(identifier, Instant::now())
    }

    pub(crate) fn record_failure_at(&self, identifier: &str, now: Instant) -> bool {
        let mut state = self.lock();
        Self::cleanup_if_due(&mut state, &self.config, now);

        let record = state
            .attempts
            .entry(identifier.to_string())
            .or_insert(AttemptRecord { failed_attempts: 0, last_failure: now, backoff_level: 0 });
        record.failed_attempts += 1;
        record.last_failure = now;
        record.backoff_level += 1;
        let locked_out = record.failed_attempts >= self.config.max_attempts;

        if locked_out {
            state.lockouts.insert(identifier.to_string(), LockoutRecord { since: now });
            warn!(identifier, "pake identifier locked out");
        }

        Self::enforce_cap(&mut state, &self.config);
        locked_out
    }

    /// Clears all records for the identifier after a successful pairing.
    pub fn record_success(&self, identifier: &str) {
        let mut state = self.lock();
        state.attempts.remove(identifier);
        state.lockouts.remove(identifier);
    }

    /// Combined attempt and lockout record count.
    pub fn record_count(&self) -> usize {
        let state = self.lock();
        state.attempts.len() + state.lockouts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cleanup_if_due(state: &mut LimiterState, config: &PakeConfig, now: Instant) {
        if now.duration_since(state.last_cleanup) < config.cleanup_interval {
            return;
        }
        state.last_cleanup = now;
        let ttl = config.attempt_ttl;
        let before = state.attempts.len();
        state.attempts.retain(|_, record| now.duration_since(record.last_failure) < ttl);
        let lockout_duration = config.lockout_duration;
        state.lockouts.retain(|_, record| now.duration_since(record.since) < lockout_duration);
        let removed = before - state.attempts.len();
        if removed > 0 {
            debug!(removed, "expired pake attempt records dropped");
        }
    }

    /// Hard memory cap: at the limit, evict the 10 % oldest records by
    /// failure time across both maps.
    fn enforce_cap(state: &mut LimiterState, config: &PakeConfig) {
        let total = state.attempts.len() + state.lockouts.len();
        if total <= config.max_records {
            return;
        }

        let evict_count = (config.max_records / 10).max(total - config.max_records);
        let mut aged: Vec<(Instant, bool, String)> = state
            .attempts
            .iter()
            .map(|(id, r)| (r.last_failure, false, id.clone()))
            .chain(state.lockouts.iter().map(|(id, r)| (r.since, true, id.clone())))
            .collect();
        aged.sort_by_key(|(t, _, _)| *t);

        for (_, is_lockout, id) in aged.into_iter().take(evict_count) {
            if is_lockout {
                state.lockouts.remove(&id);
            } else {
                state.attempts.remove(&id);
            }
        }
        warn!(evicted = evict_count, "pake rate limiter evicted oldest records");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> PakeRateLimiter {
        PakeRateLimiter::new(PakeConfig::default())
    }

    #[test]
    fn lockout_after_max_attempts() {
        let limiter = limiter();
        let start = Instant::now();

        // Two failures: still allowed after backoff.
        assert!(!limiter.record_failure_at("peer", start));
        assert!(!limiter.record_failure_at("peer", start + Duration::from_secs(10)));
        // Third failure trips the lockout.
        assert!(limiter.record_failure_at("peer", start + Duration::from_secs(30)));

        let err = limiter.check_at("peer", start + Duration::from_secs(31)).unwrap_err();
        match err {
            PakeError::LockedOut { remaining } => {
                assert!(remaining <= Duration::from_secs(300));
                assert!(remaining > Duration::from_secs(290));
            }
            other => panic!("expected lockout, got {other:?}"),
        }
    }

    #[test]
    fn lockout_expires_and_counter_resets() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..3 {
            limiter.record_failure_at("peer", start + Duration::from_secs(i * 20));
        }
        let after_lockout = start + Duration::from_secs(40) + Duration::from_secs(301);
        assert!(limiter.check_at("peer", after_lockout).is_ok());
        // A fresh failure starts from attempt one, not lockout.
        assert!(!limiter.record_failure_at("peer", after_lockout));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let limiter = limiter();
        assert_eq!(limiter.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(limiter.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(limiter.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(limiter.backoff_delay(20), Duration::from_secs(300));
        assert_eq!(limiter.backoff_delay(63), Duration::from_secs(300));
    }

    #[test]
    fn rate_limited_between_failures() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.record_failure_at("peer", start);
        match limiter.check_at("peer", start + Duration::from_millis(500)).unwrap_err() {
            PakeError::RateLimited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(2));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(limiter.check_at("peer", start + Duration::from_secs(3)).is_ok());
    }

    #[test]
    fn success_clears_all_records() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..3 {
            limiter.record_failure_at("peer", start + Duration::from_secs(i * 20));
        }
        assert!(limiter.check_at("peer", start + Duration::from_secs(41)).is_err());
        limiter.record_success("peer");
        assert!(limiter.check_at("peer", start + Duration::from_secs(41)).is_ok());
        assert_eq!(limiter.record_count(), 0);
    }

    #[test]
    fn record_count_never_exceeds_cap() {
        let config = PakeConfig { max_records: 1000, ..PakeConfig::default() };
        let limiter = PakeRateLimiter::new(config);
        let start = Instant::now();
        for i in 0..2500u32 {
            limiter.record_failure_at(&format!("peer-{i}"), start + Duration::from_millis(i as u64));
        }
        assert!(limiter.record_count() <= 1000);
    }

    #[test]
    fn eviction_drops_the_oldest() {
        let config = PakeConfig { max_records: 100, ..PakeConfig::default() };
        let limiter = PakeRateLimiter::new(config);
        let start = Instant::now();
        for i in 0..101u32 {
            limiter.record_failure_at(&format!("peer-{i}"), start + Duration::from_millis(i as u64));
        }
        // The oldest identifier was evicted; the newest survives.
        assert!(limiter.check_at("peer-0", start + Duration::from_secs(3600)).is_ok());
        assert!(limiter.record_count() <= 100);
    }

    #[test]
    fn expired_attempts_cleaned_up_opportunistically() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.record_failure_at("stale", start);
        // Past the attempt TTL and the cleanup interval, a check for any
        // identifier sweeps the stale record.
        limiter.check_at("other", start + Duration::from_secs(601)).unwrap();
        assert_eq!(limiter.record_count(), 0);
    }
}
