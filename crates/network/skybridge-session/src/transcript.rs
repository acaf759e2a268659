//! Handshake transcript: TLV-encoded messages plus negotiated context,
//! hashed to bind signatures and Finished MACs.
//!
//! The hash covers a domain separator, the protocol version, the viewing
//! role, the negotiated suite wire ID, both capability blobs, the policy
//! blob, and every appended entry in order. Role labels make the two
//! parties' views distinct by construction; each artifact is computed over
//! the signer's view and verified by recomputing that view, so a responder
//! artifact can never be replayed as an initiator one.

use crate::error::{Result, SessionError};
use chrono::Utc;
use sha2::{Digest, Sha256};

/// Domain separator for the transcript hash.
pub const TRANSCRIPT_DOMAIN: &[u8] = b"SkyBridge-P2P-Transcript-v1";

/// Protocol version bound into the transcript (u32 LE) and carried as a
/// single byte in handshake messages.
pub const PROTOCOL_VERSION: u8 = 1;

/// Handshake roles. Distinct role strings enter the transcript to prevent
/// reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that sends MessageA.
    Initiator,
    /// The side that sends MessageB.
    Responder,
}

impl Role {
    /// Label bound into the transcript hash.
    pub fn label(&self) -> &'static [u8] {
        match self {
            Role::Initiator => b"initiator",
            Role::Responder => b"responder",
        }
    }

    /// The other role.
    pub fn peer(&self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Message types, tagged with their transcript TLV byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Handshake MessageA.
    HandshakeA,
    /// Handshake MessageB.
    HandshakeB,
    /// Handshake Finished.
    HandshakeFinished,
    /// PAKE first message.
    PakeA,
    /// PAKE second message.
    PakeB,
    /// PAKE confirmation.
    PakeConfirm,
    /// Capability blob.
    CapabilityBlob,
    /// Negotiated profile blob.
    NegotiatedProfile,
    /// Video codec configuration.
    VideoCodecConfig,
    /// Post-handshake application data. Never enters the transcript.
    AppData,
    /// Latency probe. Never enters the transcript.
    Ping,
}

impl MessageType {
    /// One-byte TLV tag.
    pub fn tag(&self) -> u8 {
        match self {
            MessageType::HandshakeA => 0x01,
            MessageType::HandshakeB => 0x02,
            MessageType::HandshakeFinished => 0x03,
            MessageType::PakeA => 0x10,
            MessageType::PakeB => 0x11,
            MessageType::PakeConfirm => 0x12,
            MessageType::CapabilityBlob => 0x20,
            MessageType::NegotiatedProfile => 0x21,
            MessageType::VideoCodecConfig => 0x30,
            MessageType::AppData => 0x40,
            MessageType::Ping => 0x41,
        }
    }

    /// Whether this type may be appended to a transcript.
    pub fn enters_transcript(&self) -> bool {
        matches!(
            self,
            MessageType::HandshakeA
                | MessageType::HandshakeB
                | MessageType::HandshakeFinished
                | MessageType::PakeA
                | MessageType::PakeB
                | MessageType::PakeConfirm
                | MessageType::CapabilityBlob
                | MessageType::NegotiatedProfile
                | MessageType::VideoCodecConfig
        )
    }
}

/// One appended transcript entry.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// The message type.
    pub message_type: MessageType,
    /// TLV form: `len32LE (=1+bytes.len) || tag || bytes`.
    pub tlv: Vec<u8>,
    /// SHA-256 of the TLV form.
    pub message_hash: [u8; 32],
    /// Wall-clock append time, for diagnostics only (not hashed).
    pub timestamp_millis: i64,
}

/// Accumulates handshake messages and negotiated context into the
/// transcript hash.
#[derive(Debug)]
pub struct TranscriptBuilder {
    role: Role,
    suite_wire_id: Option<u16>,
    local_capabilities: Option<Vec<u8>>,
    peer_capabilities: Option<Vec<u8>>,
    policy: Option<Vec<u8>>,
    entries: Vec<TranscriptEntry>,
}

impl TranscriptBuilder {
    /// Creates a transcript for the given local role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            suite_wire_id: None,
            local_capabilities: None,
            peer_capabilities: None,
            policy: None,
            entries: Vec::new(),
        }
    }

    /// The local role this builder views the transcript as.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Binds the negotiated suite wire ID.
    pub fn set_suite(&mut self, wire_id: u16) {
        self.suite_wire_id = Some(wire_id);
    }

    /// Binds the local side's deterministic capability blob.
    pub fn set_local_capabilities(&mut self, blob: Vec<u8>) {
        self.local_capabilities = Some(blob);
    }

    /// Binds the peer's deterministic capability blob.
    pub fn set_peer_capabilities(&mut self, blob: Vec<u8>) {
        self.peer_capabilities = Some(blob);
    }

    /// Binds the policy blob (the initiator's, as carried in MessageA).
    pub fn set_policy(&mut self, blob: Vec<u8>) {
        self.policy = Some(blob);
    }

    /// Appends a message. Fails for types that do not enter the transcript.
    pub fn append(&mut self, message_type: MessageType, bytes: &[u8]) -> Result<()> {
        if !message_type.enters_transcript() {
            return Err(SessionError::MessageTypeNotAllowed(message_type.tag()));
        }
        let mut tlv = Vec::with_capacity(5 + bytes.len());
        tlv.extend_from_slice(&((1 + bytes.len()) as u32).to_le_bytes());
        tlv.push(message_type.tag());
        tlv.extend_from_slice(bytes);
        let message_hash: [u8; 32] = Sha256::digest(&tlv).into();
        self.entries.push(TranscriptEntry {
            message_type,
            tlv,
            message_hash,
            timestamp_millis: Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    /// Number of appended entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The transcript hash as seen by the local role.
    pub fn hash(&self) -> [u8; 32] {
        self.hash_for_role(self.role)
    }

    /// The transcript hash as the given role sees it.
    ///
    /// The capability slots follow the viewing role: "local" is always the
    /// viewer's own blob. Entries and the remaining context are shared.
    pub fn hash_for_role(&self, role: Role) -> [u8; 32] {
        let (local_caps, peer_caps) = if role == self.role {
            (&self.local_capabilities, &self.peer_capabilities)
        } else {
            (&self.peer_capabilities, &self.local_capabilities)
        };

        let mut hasher = Sha256::new();
        hasher.update(TRANSCRIPT_DOMAIN);
        hasher.update((PROTOCOL_VERSION as u32).to_le_bytes());
        hasher.update(role.label());
        if let Some(id) = self.suite_wire_id {
            hasher.update(id.to_le_bytes());
        }
        if let Some(caps) = local_caps {
            hasher.update(caps);
        }
        if let Some(caps) = peer_caps {
            hasher.update(caps);
        }
        if let Some(policy) = &self.policy {
            hasher.update(policy);
        }
        for entry in &self.entries {
            hasher.update(&entry.tlv);
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_pair() -> (TranscriptBuilder, TranscriptBuilder) {
        let mut initiator = TranscriptBuilder::new(Role::Initiator);
        let mut responder = TranscriptBuilder::new(Role::Responder);
        for t in [&mut initiator, &mut responder] {
            t.set_suite(0x0001);
            t.set_policy(vec![1, 0, 2, 0]);
        }
        initiator.set_local_capabilities(b"caps-i".to_vec());
        initiator.set_peer_capabilities(b"caps-r".to_vec());
        responder.set_local_capabilities(b"caps-r".to_vec());
        responder.set_peer_capabilities(b"caps-i".to_vec());
        (initiator, responder)
    }

    #[test]
    fn role_views_agree_across_sides() {
        let (mut initiator, mut responder) = builder_pair();
        initiator.append(MessageType::HandshakeA, b"message-a").unwrap();
        responder.append(MessageType::HandshakeA, b"message-a").unwrap();

        // Each side can reproduce the other's view exactly.
        assert_eq!(initiator.hash(), responder.hash_for_role(Role::Initiator));
        assert_eq!(responder.hash(), initiator.hash_for_role(Role::Responder));
        // The two views themselves differ (reflection prevention).
        assert_ne!(initiator.hash(), responder.hash());
    }

    #[test]
    fn hash_changes_with_every_bound_input() {
        let (initiator, _) = builder_pair();
        let base = initiator.hash();

        let (mut changed, _) = builder_pair();
        changed.set_suite(0x0101);
        assert_ne!(changed.hash(), base);

        let (mut changed, _) = builder_pair();
        changed.set_local_capabilities(b"caps-x".to_vec());
        assert_ne!(changed.hash(), base);

        let (mut changed, _) = builder_pair();
        changed.set_policy(vec![0, 0, 0, 0]);
        assert_ne!(changed.hash(), base);

        let (mut changed, _) = builder_pair();
        changed.append(MessageType::HandshakeA, b"m").unwrap();
        assert_ne!(changed.hash(), base);
    }

    #[test]
    fn single_bit_flip_in_entry_changes_hash() {
        let (mut a, _) = builder_pair();
        let (mut b, _) = builder_pair();
        a.append(MessageType::HandshakeA, &[0b0000_0000]).unwrap();
        b.append(MessageType::HandshakeA, &[0b0000_0001]).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn tlv_layout_is_exact() {
        let mut t = TranscriptBuilder::new(Role::Initiator);
        t.append(MessageType::HandshakeB, &[0xAA, 0xBB]).unwrap();
        let entry = &t.entries[0];
        assert_eq!(entry.tlv, vec![3, 0, 0, 0, 0x02, 0xAA, 0xBB]);
        assert_eq!(entry.message_hash, <[u8; 32]>::from(Sha256::digest(&entry.tlv)));
    }

    #[test]
    fn non_transcript_types_rejected() {
        let mut t = TranscriptBuilder::new(Role::Responder);
        let err = t.append(MessageType::AppData, b"payload").unwrap_err();
        assert!(matches!(err, SessionError::MessageTypeNotAllowed(0x40)));
        let err = t.append(MessageType::Ping, b"").unwrap_err();
        assert!(matches!(err, SessionError::MessageTypeNotAllowed(_)));
        assert!(t.is_empty());
    }

    #[test]
    fn entry_order_matters() {
        let mut ab = TranscriptBuilder::new(Role::Initiator);
        ab.append(MessageType::HandshakeA, b"x").unwrap();
        ab.append(MessageType::HandshakeB, b"y").unwrap();
        let mut ba = TranscriptBuilder::new(Role::Initiator);
        ba.append(MessageType::HandshakeB, b"y").unwrap();
        ba.append(MessageType::HandshakeA, b"x").unwrap();
        assert_ne!(ab.hash(), ba.hash());
    }
}
