//! Error types for the session layer.

use crate::pake::PakeError;
use thiserror::Error;

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the handshake driver and session manager.
///
/// All crypto errors propagate here and convert to session teardown;
/// wire-format and policy errors are never silently masked. Rate-limit
/// errors are recoverable after the returned delay; everything else is
/// terminal for the current connection attempt.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Wire-format error from the codec layer.
    #[error("wire error: {0}")]
    Wire(#[from] skybridge_wire::WireError),

    /// Error from the crypto provider layer.
    #[error("crypto error: {0}")]
    Crypto(#[from] skybridge_crypto::CryptoError),

    /// Error from the trust store.
    #[error("trust error: {0}")]
    Trust(#[from] skybridge_trust::TrustError),

    /// Error from the PAKE subsystem.
    #[error("pake error: {0}")]
    Pake(#[from] PakeError),

    /// A signature or Finished MAC failed verification.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The negotiated outcome violates the local policy.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A downgrade below the required suite family was detected.
    #[error("downgrade detected: {0}")]
    Downgrade(String),

    /// No common acceptable suite under policy.
    #[error("suite negotiation failed")]
    SuiteNegotiationFailed,

    /// Duplicate handshake ID within the replay window.
    #[error("handshake replay detected")]
    Replay,

    /// The handshake deadline was exceeded.
    #[error("handshake timed out")]
    Timeout,

    /// A handshake message failed structural validation.
    #[error("invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A message type that does not enter the transcript was appended.
    #[error("message type {0:#04x} not allowed in transcript")]
    MessageTypeNotAllowed(u8),

    /// Business traffic attempted during the bootstrap-assisted phase.
    #[error("only pairing identity exchange is permitted during bootstrap")]
    BootstrapControlOnly,

    /// The peer did not deliver KEM keys within the bootstrap window.
    #[error("peer did not deliver KEM keys within the bootstrap window")]
    BootstrapKemKeyTimeout,

    /// The system random number generator failed.
    #[error("random generation failed")]
    RandomGenerationFailed,

    /// A driver method was called in the wrong state.
    #[error("invalid handshake state: {0}")]
    InvalidState(String),

    /// The transport closed mid-conversation.
    #[error("connection closed")]
    ConnectionClosed,
}

impl SessionError {
    /// Severity classification for observability.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SessionError::AuthFailed(_)
            | SessionError::Downgrade(_)
            | SessionError::Replay
            | SessionError::RandomGenerationFailed => ErrorSeverity::Critical,
            SessionError::Crypto(e) => match e.severity() {
                skybridge_crypto::ErrorSeverity::Critical => ErrorSeverity::Critical,
                skybridge_crypto::ErrorSeverity::Major => ErrorSeverity::Major,
                skybridge_crypto::ErrorSeverity::Minor => ErrorSeverity::Minor,
            },
            SessionError::Timeout | SessionError::Pake(_) => ErrorSeverity::Minor,
            _ => ErrorSeverity::Major,
        }
    }

    /// Classifies the error for metrics without revealing details.
    pub fn observable_type(&self) -> &'static str {
        match self {
            SessionError::Wire(_) => "wire",
            SessionError::Crypto(_) => "crypto",
            SessionError::Trust(_) => "trust",
            SessionError::Pake(_) => "pake",
            SessionError::AuthFailed(_) => "auth_failed",
            SessionError::PolicyViolation(_) => "policy_violation",
            SessionError::Downgrade(_) => "downgrade",
            SessionError::SuiteNegotiationFailed => "suite_negotiation_failed",
            SessionError::Replay => "replay",
            SessionError::Timeout => "timeout",
            SessionError::InvalidMessageFormat(_) => "invalid_message_format",
            SessionError::MessageTypeNotAllowed(_) => "message_type_not_allowed",
            SessionError::BootstrapControlOnly => "bootstrap_control_only",
            SessionError::BootstrapKemKeyTimeout => "bootstrap_kem_key_timeout",
            SessionError::RandomGenerationFailed => "rng",
            SessionError::InvalidState(_) => "invalid_state",
            SessionError::ConnectionClosed => "connection_closed",
        }
    }

    /// Whether the bootstrap-assisted recovery path may apply.
    pub fn triggers_bootstrap(&self) -> bool {
        matches!(self, SessionError::SuiteNegotiationFailed | SessionError::Timeout)
    }
}

/// Error severity levels for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention.
    Critical,
    /// Major errors that impact functionality.
    Major,
    /// Minor errors that can be recovered from.
    Minor,
}
