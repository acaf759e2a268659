//! Typed telemetry events with an injectable sink.
//!
//! Security-relevant events flow through [`TelemetrySink`] so hosts can
//! forward them to their own pipeline; the default sink logs via `tracing`.

use crate::handshake::AssuranceLevel;
use skybridge_crypto::{ProviderSelection, Suite};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Security-relevant session events.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// A crypto provider was selected for a session.
    ProviderSelected {
        /// Tier, fallback flag and probe results.
        selection: ProviderSelection,
    },
    /// A handshake reached `Established`.
    HandshakeEstablished {
        /// Negotiated suite.
        suite: Suite,
        /// Session assurance classification.
        assurance: AssuranceLevel,
    },
    /// A signature or Finished MAC failed.
    AuthFailed {
        /// What failed, without sensitive detail.
        reason: String,
    },
    /// A suite was rejected by policy.
    PolicyRejected {
        /// The offending suite.
        suite: Suite,
    },
    /// No common suite could be negotiated.
    SuiteNegotiationFailed,
    /// A duplicate handshake ID was seen inside the replay window.
    ReplayDetected,
    /// A PAKE identifier entered lockout.
    PakeLockout {
        /// The locked-out identifier.
        identifier: String,
    },
    /// A PAKE confirmation failed (wrong code or tampering).
    PakeFailure {
        /// The attempting identifier.
        identifier: String,
    },
    /// The system RNG failed. Critical.
    RandomGenerationFailure,
    /// Bootstrap-assisted recovery started.
    BootstrapStarted {
        /// Peer identifier.
        peer: String,
    },
    /// Bootstrap-assisted recovery finished.
    BootstrapCompleted {
        /// Peer identifier.
        peer: String,
        /// Whether the strict-PQC re-handshake succeeded.
        success: bool,
    },
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Emits one event.
    fn emit(&self, event: TelemetryEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ProviderSelected { selection } => {
                info!(?selection, "provider selected");
            }
            TelemetryEvent::HandshakeEstablished { suite, assurance } => {
                info!(%suite, ?assurance, "handshake established");
            }
            TelemetryEvent::AuthFailed { reason } => warn!(reason, "authentication failed"),
            TelemetryEvent::PolicyRejected { suite } => warn!(%suite, "suite rejected by policy"),
            TelemetryEvent::SuiteNegotiationFailed => warn!("suite negotiation failed"),
            TelemetryEvent::ReplayDetected => warn!("handshake replay detected"),
            TelemetryEvent::PakeLockout { identifier } => {
                warn!(identifier, "pake identifier locked out")
            }
            TelemetryEvent::PakeFailure { identifier } => {
                warn!(identifier, "pake confirmation failed")
            }
            TelemetryEvent::RandomGenerationFailure => error!("system RNG failure"),
            TelemetryEvent::BootstrapStarted { peer } => info!(peer, "bootstrap recovery started"),
            TelemetryEvent::BootstrapCompleted { peer, success } => {
                info!(peer, success, "bootstrap recovery completed")
            }
        }
    }
}

/// Recording sink for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Whether any recorded event satisfies the predicate.
    pub fn any(&self, predicate: impl Fn(&TelemetryEvent) -> bool) -> bool {
        self.events().iter().any(|e| predicate(e))
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
