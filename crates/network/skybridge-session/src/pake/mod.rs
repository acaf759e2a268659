//! PAKE pairing: SPAKE2+-style six-digit-code exchange with bounded-memory
//! rate limiting.

pub mod rate_limit;
pub mod spake2;

pub use rate_limit::PakeRateLimiter;
pub use spake2::{
    PakeConfirm, PakeInitiator, PakeKeys, PakeMessageA, PakeMessageB, PakeResponder,
};

use crate::config::PakeConfig;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from the PAKE subsystem.
#[derive(Error, Debug)]
pub enum PakeError {
    /// Attempts for this identifier are arriving too fast.
    #[error("rate limited; retry after {retry_after:?}")]
    RateLimited {
        /// How long to wait before the next attempt.
        retry_after: Duration,
    },

    /// The identifier is locked out after too many failures.
    #[error("locked out; {remaining:?} remaining")]
    LockedOut {
        /// Remaining lockout time.
        remaining: Duration,
    },

    /// The confirmation MAC did not verify (wrong code or tampering).
    #[error("pairing confirmation failed")]
    MacVerificationFailed,

    /// A received point was not a valid P-256 element.
    #[error("invalid pairing point")]
    InvalidPoint,

    /// A pairing message failed structural validation.
    #[error("malformed pairing message: {0}")]
    InvalidMessage(String),

    /// The system RNG failed; pairing aborts with no weak-random fallback.
    #[error("random generation failed")]
    RandomGenerationFailed,
}

/// Pairing front door: wires the SPAKE2+ exchange to the rate limiter and
/// telemetry. One service instance is process-wide state, like the trust
/// store.
pub struct PakeService {
    limiter: PakeRateLimiter,
    telemetry: Arc<dyn TelemetrySink>,
}

impl PakeService {
    /// Creates a service with the given limits.
    pub fn new(config: PakeConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { limiter: PakeRateLimiter::new(config), telemetry }
    }

    /// Starts a pairing exchange as the initiator, after a rate-limit
    /// check on the peer identifier.
    pub fn begin(
        &self,
        peer_identifier: &str,
        code: &str,
        local_id: &str,
        peer_id: &str,
        capabilities: Vec<u8>,
    ) -> Result<(PakeInitiator, PakeMessageA), PakeError> {
        self.limiter.check(peer_identifier)?;
        spake2::PakeInitiator::start(code, local_id, peer_id, capabilities).inspect_err(|e| {
            if matches!(e, PakeError::RandomGenerationFailed) {
                self.telemetry.emit(TelemetryEvent::RandomGenerationFailure);
            }
        })
    }

    /// Responds to a pairing request, after a rate-limit check.
    pub fn respond(
        &self,
        peer_identifier: &str,
        code: &str,
        local_id: &str,
        message_a: &PakeMessageA,
        profile: Vec<u8>,
    ) -> Result<(PakeResponder, PakeMessageB), PakeError> {
        self.limiter.check(peer_identifier)?;
        spake2::PakeResponder::respond(code, local_id, message_a, profile).inspect_err(|e| {
            if matches!(e, PakeError::RandomGenerationFailed) {
                self.telemetry.emit(TelemetryEvent::RandomGenerationFailure);
            }
        })
    }

    /// Completes the exchange on the initiator side, recording the outcome
    /// against the peer identifier.
    pub fn finish(
        &self,
        peer_identifier: &str,
        initiator: PakeInitiator,
        message_b: &PakeMessageB,
    ) -> Result<(PakeConfirm, PakeKeys), PakeError> {
        self.limiter.check(peer_identifier)?;
        match initiator.finish(message_b) {
            Ok(result) => {
                self.limiter.record_success(peer_identifier);
                Ok(result)
            }
            Err(PakeError::MacVerificationFailed) => {
                self.note_failure(peer_identifier);
                Err(PakeError::MacVerificationFailed)
            }
            Err(other) => Err(other),
        }
    }

    /// Verifies the initiator's confirmation on the responder side,
    /// recording the outcome against the peer identifier.
    pub fn verify_confirm(
        &self,
        peer_identifier: &str,
        responder: &PakeResponder,
        confirm: &PakeConfirm,
    ) -> Result<(), PakeError> {
        match responder.verify_confirm(confirm) {
            Ok(()) => {
                self.limiter.record_success(peer_identifier);
                Ok(())
            }
            Err(PakeError::MacVerificationFailed) => {
                self.note_failure(peer_identifier);
                Err(PakeError::MacVerificationFailed)
            }
            Err(other) => Err(other),
        }
    }

    fn note_failure(&self, peer_identifier: &str) {
        let locked_out = self.limiter.record_failure(peer_identifier);
        self.telemetry
            .emit(TelemetryEvent::PakeFailure { identifier: peer_identifier.to_string() });
        if locked_out {
            self.telemetry
                .emit(TelemetryEvent::PakeLockout { identifier: peer_identifier.to_string() });
        }
    }

    /// Combined record count, for observability.
    pub fn record_count(&self) -> usize {
        self.limiter.record_count()
    }
}
