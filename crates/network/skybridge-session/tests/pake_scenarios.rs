//! PAKE pairing scenarios: the full service flow with rate limiting.

use skybridge_session::pake::rate_limit::PakeRateLimiter;
use skybridge_session::pake::{PakeError, PakeService};
use skybridge_session::telemetry::TelemetryEvent;
use skybridge_session::{PakeConfig, RecordingSink};
use std::sync::Arc;

fn service() -> (PakeService, Arc<RecordingSink>) {
    let telemetry = Arc::new(RecordingSink::new());
    (PakeService::new(PakeConfig::default(), telemetry.clone()), telemetry)
}

#[test]
fn successful_pairing_clears_rate_limit_state() {
    let (service, _telemetry) = service();

    let (initiator, message_a) =
        service.begin("bob", "314159", "alice", "bob", b"caps".to_vec()).unwrap();
    let (responder, message_b) =
        service.respond("alice", "314159", "bob", &message_a, b"profile".to_vec()).unwrap();
    let (confirm, initiator_keys) = service.finish("bob", initiator, &message_b).unwrap();
    service.verify_confirm("alice", &responder, &confirm).unwrap();

    assert_eq!(initiator_keys.session_key, responder.keys().session_key);
    assert_eq!(service.record_count(), 0);
}

#[test]
fn s6_wrong_code_attempts_lock_out_the_identifier() {
    // Zero base backoff lets the attempts run back to back; the lockout
    // threshold is what this scenario exercises.
    let config = PakeConfig { base_backoff: std::time::Duration::ZERO, ..PakeConfig::default() };
    let telemetry = Arc::new(RecordingSink::new());
    let service = PakeService::new(config, telemetry.clone());

    // Three consecutive wrong codes from the same identifier. Each fails
    // MAC verification; the third trips the lockout.
    for attempt in 0..3 {
        let (initiator, message_a) =
            service.begin("bob", "111111", "alice", "bob", Vec::new()).unwrap();
        let (_, message_b) =
            PakeService::new(PakeConfig::default(), Arc::new(RecordingSink::new()))
                .respond("alice", "999999", "bob", &message_a, Vec::new())
                .unwrap();
        let err = service.finish("bob", initiator, &message_b).unwrap_err();
        assert!(matches!(err, PakeError::MacVerificationFailed), "attempt {attempt}");
    }

    // The fourth call reports the lockout with its remaining time.
    let err = service.begin("bob", "111111", "alice", "bob", Vec::new()).unwrap_err();
    match err {
        PakeError::LockedOut { remaining } => assert!(!remaining.is_zero()),
        other => panic!("expected lockout, got {other:?}"),
    }

    assert!(telemetry.any(|e| matches!(e, TelemetryEvent::PakeFailure { .. })));
    assert!(telemetry.any(|e| matches!(e, TelemetryEvent::PakeLockout { .. })));
}

#[test]
fn rate_limiter_memory_stays_bounded_at_default_cap() {
    // Property: the combined record count never exceeds 50 000 regardless
    // of input rate.
    let limiter = PakeRateLimiter::new(PakeConfig::default());
    for i in 0..55_000u32 {
        limiter.record_failure(&format!("attacker-{i}"));
        if i % 10_000 == 0 {
            assert!(limiter.record_count() <= 50_000);
        }
    }
    assert!(limiter.record_count() <= 50_000);
}
