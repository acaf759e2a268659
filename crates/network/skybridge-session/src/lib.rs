//! # SkyBridge Session
//!
//! The peer-to-peer secure session core: a post-quantum-capable two-message
//! handshake with transcript binding and Finished MACs, a SPAKE2+-style
//! pairing subsystem with bounded-memory rate limiting, a replay cache,
//! and the session manager that owns the encrypted application channel
//! and the bootstrap-assisted recovery path.
//!
//! ## Architecture
//!
//! - [`handshake`]: the two-message state machine ([`handshake::Initiator`]
//!   / [`handshake::Responder`]) that yields directional [`handshake::SessionKeys`].
//! - [`transcript`]: TLV transcript hashing that binds policy, both
//!   capability blobs and the selected suite into every signature and MAC.
//! - [`messages`]: bit-exact wire formats for MessageA/B/Finished and the
//!   pairing identity exchange.
//! - [`pake`]: SPAKE2+ over P-256 with the RFC 9382 constants.
//! - [`manager`]: connection lifecycle, rekey gate, latency sampling and
//!   bootstrap-assisted recovery.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod messages;
pub mod pake;
pub mod policy;
pub mod replay;
pub mod telemetry;
pub mod transcript;
pub mod transport;

pub use config::{PakeConfig, SessionConfig};
pub use error::{ErrorSeverity, Result, SessionError};
pub use handshake::{
    AssuranceLevel, Initiator, KemIdentity, LocalIdentity, Responder, SessionKeys,
};
pub use manager::{EstablishedSession, SessionManager};
pub use messages::{AppMessage, Finished, MessageA, MessageB, PairingIdentityExchange};
pub use pake::{PakeError, PakeService};
pub use policy::HandshakePolicy;
pub use replay::ReplayCache;
pub use telemetry::{RecordingSink, TelemetryEvent, TelemetrySink, TracingSink};
pub use transcript::{MessageType, Role, TranscriptBuilder, PROTOCOL_VERSION};
pub use transport::{memory_pair, FrameTransport, MemoryTransport};
