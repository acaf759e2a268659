//! Handshake message wire formats and post-handshake control messages.
//!
//! Multi-byte integers inside handshake messages are little-endian. The
//! nested `u16` length prefixes are deliberate: each container's parser
//! reads against its own declared length, never the outer remainder.

use crate::error::{Result, SessionError};
use crate::transcript::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use skybridge_crypto::{AeadAlgorithm, IdentityPublicKeys, SealedBox, SealedBoxContext, Suite};
use skybridge_trust::KemPublicKeyInfo;
use skybridge_wire::{Decoder, Encoder};

/// Finished message length: `"FIN1"(4) || version(1) || direction(1) ||
/// mac(32)`.
pub const FINISHED_LEN: usize = 38;

/// Finished magic prefix.
pub const FINISHED_MAGIC: &[u8; 4] = b"FIN1";

/// Finished direction byte: responder → initiator.
pub const DIRECTION_RESPONDER_TO_INITIATOR: u8 = 0x01;

/// Finished direction byte: initiator → responder.
pub const DIRECTION_INITIATOR_TO_RESPONDER: u8 = 0x02;

fn bad(msg: impl Into<String>) -> SessionError {
    SessionError::InvalidMessageFormat(msg.into())
}

/// A per-suite key share in MessageA.
///
/// PQC suites carry the KEM ciphertext encapsulated to the responder's
/// identity key (hybrid: ciphertext || ephemeral X25519 public); classic
/// suites carry the initiator's ephemeral public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
    /// Suite the share belongs to.
    pub suite_wire_id: u16,
    /// The share bytes; length fixed by the suite table.
    pub share: Vec<u8>,
}

/// First handshake message, initiator → responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageA {
    /// Protocol version byte.
    pub protocol_version: u8,
    /// Offered suite wire IDs in priority order.
    pub supported_suites: Vec<u16>,
    /// Key shares; a subsequence of `supported_suites` in the same order.
    pub key_shares: Vec<KeyShare>,
    /// Fresh initiator nonce.
    pub client_nonce: [u8; 32],
    /// Deterministic capability blob.
    pub capabilities: Vec<u8>,
    /// Deterministic policy blob.
    pub policy: Vec<u8>,
    /// Initiator identity public keys.
    pub identity: IdentityPublicKeys,
    /// Identity signature over the signing preimage.
    pub signature: Vec<u8>,
    /// Optional Secure Enclave proof-of-possession signature.
    pub se_signature: Vec<u8>,
}

fn put_u16_block(enc: &mut Encoder, bytes: &[u8]) {
    enc.put_u16(bytes.len() as u16);
    enc.put_raw(bytes);
}

fn read_u16_block<'a>(dec: &mut Decoder<'a>) -> Result<&'a [u8]> {
    let len = dec.u16()? as usize;
    Ok(dec.raw(len)?)
}

impl MessageA {
    fn encode_unsigned(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u8(self.protocol_version);
        enc.put_u16(self.supported_suites.len() as u16);
        for id in &self.supported_suites {
            enc.put_u16(*id);
        }
        enc.put_u16(self.key_shares.len() as u16);
        for share in &self.key_shares {
            enc.put_u16(share.suite_wire_id);
            put_u16_block(&mut enc, &share.share);
        }
        enc.put_raw(&self.client_nonce);
        put_u16_block(&mut enc, &self.capabilities);
        put_u16_block(&mut enc, &self.policy);
        put_u16_block(&mut enc, &self.identity.encode());
        enc.into_bytes()
    }

    /// Preimage of the identity signature: `"SkyBridge-A" || message
    /// without its signature fields`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = b"SkyBridge-A".to_vec();
        out.extend_from_slice(&self.encode_unsigned());
        out
    }

    /// Serializes the complete message.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.encode_unsigned();
        let mut enc = Encoder::new();
        put_u16_block(&mut enc, &self.signature);
        put_u16_block(&mut enc, &self.se_signature);
        out.extend_from_slice(&enc.into_bytes());
        out
    }

    /// Parses and structurally validates a MessageA.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf);
        let protocol_version = dec.u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(bad(format!("unsupported protocol version {protocol_version}")));
        }

        let suite_count = dec.u16()? as usize;
        let mut supported_suites = Vec::with_capacity(suite_count);
        for _ in 0..suite_count {
            supported_suites.push(dec.u16()?);
        }

        let share_count = dec.u16()? as usize;
        let mut key_shares = Vec::with_capacity(share_count);
        for _ in 0..share_count {
            let suite_wire_id = dec.u16()?;
            let share = read_u16_block(&mut dec)?.to_vec();
            key_shares.push(KeyShare { suite_wire_id, share });
        }

        let client_nonce: [u8; 32] =
            dec.raw(32)?.try_into().expect("fixed-length read");
        let capabilities = read_u16_block(&mut dec)?.to_vec();
        let policy = read_u16_block(&mut dec)?.to_vec();
        let identity = IdentityPublicKeys::decode(read_u16_block(&mut dec)?)?;
        let signature = read_u16_block(&mut dec)?.to_vec();
        let se_signature = read_u16_block(&mut dec)?.to_vec();
        dec.finish()?;

        let message = Self {
            protocol_version,
            supported_suites,
            key_shares,
            client_nonce,
            capabilities,
            policy,
            identity,
            signature,
            se_signature,
        };
        message.validate()?;
        Ok(message)
    }

    /// Checks the key-share invariants: a subsequence of the offered
    /// suites, no duplicates, lengths per the suite table.
    pub fn validate(&self) -> Result<()> {
        let mut suite_cursor = self.supported_suites.iter();
        for share in &self.key_shares {
            // Advancing an outer cursor enforces both ordering and
            // uniqueness in one pass.
            if !suite_cursor.any(|id| *id == share.suite_wire_id) {
                return Err(bad(format!(
                    "key share for {:#06x} is not an ordered subsequence of the offer",
                    share.suite_wire_id
                )));
            }
            let suite = Suite::from_wire_id(share.suite_wire_id);
            if let Some(expected) = suite.initiator_share_len() {
                if share.share.len() != expected {
                    return Err(bad(format!(
                        "key share for {suite} must be {expected} bytes, got {}",
                        share.share.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// The key share offered for a suite, if any.
    pub fn share_for(&self, wire_id: u16) -> Option<&KeyShare> {
        self.key_shares.iter().find(|s| s.suite_wire_id == wire_id)
    }
}

/// Second handshake message, responder → initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageB {
    /// Protocol version byte.
    pub protocol_version: u8,
    /// The selected suite wire ID.
    pub selected_suite: u16,
    /// Responder share: empty for PQC suites, an ephemeral public for
    /// classic suites.
    pub responder_share: Vec<u8>,
    /// Fresh responder nonce.
    pub server_nonce: [u8; 32],
    /// Sealed box carrying the responder capabilities and negotiated
    /// profile.
    pub encrypted_payload: SealedBox,
    /// Responder identity public keys.
    pub identity: IdentityPublicKeys,
    /// Identity signature over the signing preimage.
    pub signature: Vec<u8>,
    /// Optional Secure Enclave proof-of-possession signature.
    pub se_signature: Vec<u8>,
}

impl MessageB {
    /// Serializes the complete message.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u8(self.protocol_version);
        enc.put_u16(self.selected_suite);
        put_u16_block(&mut enc, &self.responder_share);
        enc.put_raw(&self.server_nonce);
        enc.put_raw(&self.encrypted_payload.encode());
        put_u16_block(&mut enc, &self.identity.encode());
        put_u16_block(&mut enc, &self.signature);
        put_u16_block(&mut enc, &self.se_signature);
        enc.into_bytes()
    }

    /// Parses and structurally validates a MessageB.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf);
        let protocol_version = dec.u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(bad(format!("unsupported protocol version {protocol_version}")));
        }
        let selected_suite = dec.u16()?;
        let responder_share = read_u16_block(&mut dec)?.to_vec();
        let server_nonce: [u8; 32] =
            dec.raw(32)?.try_into().expect("fixed-length read");

        // The sealed box is self-describing; read its total length from
        // the header, then hand exactly that window to its parser.
        let remaining = dec.remaining();
        let rest = dec.raw(remaining)?;
        let box_len = SealedBox::peek_total_len(rest)?;
        if box_len > rest.len() {
            return Err(bad("sealed box exceeds message bounds"));
        }
        let encrypted_payload = SealedBox::decode(&rest[..box_len], SealedBoxContext::Handshake)?;
        let mut dec = Decoder::new(&rest[box_len..]);

        let identity = IdentityPublicKeys::decode(read_u16_block(&mut dec)?)?;
        let signature = read_u16_block(&mut dec)?.to_vec();
        let se_signature = read_u16_block(&mut dec)?.to_vec();
        dec.finish()?;

        let message = Self {
            protocol_version,
            selected_suite,
            responder_share,
            server_nonce,
            encrypted_payload,
            identity,
            signature,
            se_signature,
        };
        message.validate()?;
        Ok(message)
    }

    /// Checks the responder share length against the suite table.
    pub fn validate(&self) -> Result<()> {
        let suite = Suite::from_wire_id(self.selected_suite);
        if let Some(expected) = suite.responder_share_len() {
            if self.responder_share.len() != expected {
                return Err(bad(format!(
                    "responder share for {suite} must be {expected} bytes, got {}",
                    self.responder_share.len()
                )));
            }
        }
        Ok(())
    }

    /// Preimage of the responder's identity signature.
    pub fn signing_bytes(&self, transcript_hash_after_a: &[u8; 32]) -> Vec<u8> {
        let mut out = b"SkyBridge-B".to_vec();
        out.extend_from_slice(transcript_hash_after_a);
        out.extend_from_slice(&self.selected_suite.to_le_bytes());
        out.extend_from_slice(&(self.responder_share.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.responder_share);
        out.extend_from_slice(&self.server_nonce);
        let payload_hash = sha2::Sha256::digest(self.encrypted_payload.encode());
        out.extend_from_slice(&payload_hash);
        out.extend_from_slice(&self.identity.encode());
        out
    }
}

/// Handshake Finished message, fixed 38 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
    /// Protocol version byte.
    pub version: u8,
    /// Direction byte (0x01 responder→initiator, 0x02 initiator→responder).
    pub direction: u8,
    /// HMAC over the transcript hash and direction.
    pub mac: [u8; 32],
}

impl Finished {
    /// Serializes the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FINISHED_LEN);
        out.extend_from_slice(FINISHED_MAGIC);
        out.push(self.version);
        out.push(self.direction);
        out.extend_from_slice(&self.mac);
        out
    }

    /// Parses a Finished message; the length must be exactly 38 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FINISHED_LEN {
            return Err(bad(format!("Finished must be {FINISHED_LEN} bytes, got {}", buf.len())));
        }
        if &buf[..4] != FINISHED_MAGIC {
            return Err(bad("bad Finished magic"));
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(bad(format!("unsupported Finished version {version}")));
        }
        let direction = buf[5];
        if direction != DIRECTION_RESPONDER_TO_INITIATOR
            && direction != DIRECTION_INITIATOR_TO_RESPONDER
        {
            return Err(bad(format!("invalid Finished direction {direction:#04x}")));
        }
        let mac: [u8; 32] = buf[6..].try_into().expect("length checked");
        Ok(Self { version, direction, mac })
    }
}

/// Deterministic capability blob: sorted, deduplicated strings.
pub fn encode_capabilities(capabilities: &[String]) -> Vec<u8> {
    let mut sorted: Vec<&String> = capabilities.iter().collect();
    sorted.sort();
    sorted.dedup();
    let mut enc = Encoder::new();
    enc.put_array(&sorted, |e, cap| e.put_string(cap));
    enc.into_bytes()
}

/// Parses a capability blob.
pub fn decode_capabilities(blob: &[u8]) -> Result<Vec<String>> {
    let mut dec = Decoder::new(blob);
    let caps = dec.array(|d| d.string())?;
    dec.finish()?;
    Ok(caps)
}

/// Profile agreed by the responder, carried inside MessageB's sealed
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedProfile {
    /// AEAD for the encrypted application channel.
    pub aead: AeadAlgorithm,
    /// The responder's deterministic capability blob.
    pub responder_capabilities: Vec<u8>,
}

impl NegotiatedProfile {
    /// Serializes the profile.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_u8(match self.aead {
            AeadAlgorithm::Aes256Gcm => 1,
            AeadAlgorithm::ChaCha20Poly1305 => 2,
        });
        enc.put_bytes(&self.responder_capabilities);
        enc.into_bytes()
    }

    /// Parses a profile.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(buf);
        let aead = match dec.u8()? {
            1 => AeadAlgorithm::Aes256Gcm,
            2 => AeadAlgorithm::ChaCha20Poly1305,
            other => return Err(bad(format!("unknown AEAD byte {other:#04x}"))),
        };
        let responder_capabilities = dec.bytes()?.to_vec();
        dec.finish()?;
        Ok(Self { aead, responder_capabilities })
    }
}

/// Post-handshake control messages, as deterministic JSON with sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppMessage {
    /// Delivers the sender's KEM public keys and device metadata; the only
    /// message permitted during bootstrap-assisted recovery.
    #[serde(rename = "pairingIdentityExchange")]
    PairingIdentityExchange(PairingIdentityExchange),
}

/// Payload of the pairing identity exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingIdentityExchange {
    /// Sender's device ID.
    pub device_id: String,
    /// Sender's KEM public keys, one per suite.
    pub kem_public_keys: Vec<KemPublicKeyInfo>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_name: Option<String>,
    /// Hardware model.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    /// Platform name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub platform: Option<String>,
    /// OS version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub os_version: Option<String>,
    /// Chip identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chip: Option<String>,
}

impl AppMessage {
    /// Serializes as deterministic sorted-key JSON.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        Ok(skybridge_trust::canonical_json(self)
            .map_err(SessionError::Trust)?
            .into_bytes())
    }

    /// Parses a control message.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| bad(format!("malformed control message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skybridge_crypto::SignatureAlgorithm;

    fn sample_identity() -> IdentityPublicKeys {
        IdentityPublicKeys::new(SignatureAlgorithm::Ed25519, vec![0xAB; 32], None).unwrap()
    }

    fn sample_message_a() -> MessageA {
        MessageA {
            protocol_version: PROTOCOL_VERSION,
            supported_suites: vec![0x0001, 0x0101, 0x1001],
            key_shares: vec![
                KeyShare { suite_wire_id: 0x0101, share: vec![0x11; 1088] },
                KeyShare { suite_wire_id: 0x1001, share: vec![0x22; 32] },
            ],
            client_nonce: [0x42; 32],
            capabilities: encode_capabilities(&["pqc".to_string(), "video".to_string()]),
            policy: vec![0, 1, 0, 0],
            identity: sample_identity(),
            signature: vec![0xCC; 64],
            se_signature: Vec::new(),
        }
    }

    #[test]
    fn message_a_round_trip() {
        let message = sample_message_a();
        let decoded = MessageA::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_a_signing_bytes_exclude_signatures() {
        let message = sample_message_a();
        let mut resigned = message.clone();
        resigned.signature = vec![0xDD; 64];
        assert_eq!(message.signing_bytes(), resigned.signing_bytes());
        assert!(message.signing_bytes().starts_with(b"SkyBridge-A"));
    }

    #[test]
    fn share_not_in_offer_rejected() {
        let mut message = sample_message_a();
        message.key_shares.push(KeyShare { suite_wire_id: 0x1002, share: vec![0; 65] });
        assert!(MessageA::decode(&message.encode()).is_err());
    }

    #[test]
    fn out_of_order_shares_rejected() {
        let mut message = sample_message_a();
        message.key_shares.reverse();
        assert!(MessageA::decode(&message.encode()).is_err());
    }

    #[test]
    fn wrong_share_length_rejected() {
        let mut message = sample_message_a();
        message.key_shares[0].share.pop();
        assert!(MessageA::decode(&message.encode()).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = sample_message_a().encode();
        buf.push(0);
        assert!(MessageA::decode(&buf).is_err());
    }

    fn sample_message_b() -> MessageB {
        let payload = skybridge_crypto::hpke::seal_with_key(
            &[9u8; 32],
            Suite::X25519Ed25519,
            b"",
            b"profile",
        )
        .unwrap();
        MessageB {
            protocol_version: PROTOCOL_VERSION,
            selected_suite: 0x1001,
            responder_share: vec![0x33; 32],
            server_nonce: [0x55; 32],
            encrypted_payload: payload,
            identity: sample_identity(),
            signature: vec![0xEE; 64],
            se_signature: Vec::new(),
        }
    }

    #[test]
    fn message_b_round_trip() {
        let message = sample_message_b();
        let decoded = MessageB::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn pqc_selection_requires_empty_responder_share() {
        let mut message = sample_message_b();
        message.selected_suite = 0x0101;
        assert!(MessageB::decode(&message.encode()).is_err());

        message.responder_share = Vec::new();
        let decoded = MessageB::decode(&message.encode()).unwrap();
        assert!(decoded.responder_share.is_empty());
    }

    #[test]
    fn message_b_signing_bytes_cover_payload() {
        let message = sample_message_b();
        let hash = [7u8; 32];
        let base = message.signing_bytes(&hash);

        let mut tampered = message.clone();
        tampered.encrypted_payload.ciphertext[0] ^= 1;
        assert_ne!(base, tampered.signing_bytes(&hash));
        assert_ne!(base, message.signing_bytes(&[8u8; 32]));
    }

    #[test]
    fn finished_layout_is_exact() {
        let finished = Finished {
            version: PROTOCOL_VERSION,
            direction: DIRECTION_RESPONDER_TO_INITIATOR,
            mac: [0xAA; 32],
        };
        let buf = finished.encode();
        assert_eq!(buf.len(), FINISHED_LEN);
        assert_eq!(&buf[..4], b"FIN1");
        assert_eq!(Finished::decode(&buf).unwrap(), finished);

        assert!(Finished::decode(&buf[..37]).is_err());
        let mut bad_direction = buf.clone();
        bad_direction[5] = 0x03;
        assert!(Finished::decode(&bad_direction).is_err());
    }

    #[test]
    fn capabilities_blob_is_order_independent() {
        let a = encode_capabilities(&["video".to_string(), "pqc".to_string()]);
        let b = encode_capabilities(&["pqc".to_string(), "video".to_string()]);
        assert_eq!(a, b);
        assert_eq!(decode_capabilities(&a).unwrap(), vec!["pqc", "video"]);
    }

    #[test]
    fn negotiated_profile_round_trip() {
        let profile = NegotiatedProfile {
            aead: AeadAlgorithm::ChaCha20Poly1305,
            responder_capabilities: encode_capabilities(&["pqc".to_string()]),
        };
        assert_eq!(NegotiatedProfile::decode(&profile.encode()).unwrap(), profile);
    }

    #[test]
    fn app_message_json_is_canonical() {
        let message = AppMessage::PairingIdentityExchange(PairingIdentityExchange {
            device_id: "dev-1".to_string(),
            kem_public_keys: vec![KemPublicKeyInfo {
                suite_wire_id: 0x0101,
                public_key: vec![1, 2, 3],
            }],
            device_name: Some("Desk".to_string()),
            model: None,
            platform: Some("macOS".to_string()),
            os_version: None,
            chip: None,
        });
        let json = message.to_canonical_json().unwrap();
        let text = String::from_utf8(json.clone()).unwrap();
        // Sorted keys: chip/deviceId/... and "type" tag present.
        assert!(text.find("\"deviceId\"").unwrap() < text.find("\"deviceName\"").unwrap());
        assert!(text.contains("\"type\":\"pairingIdentityExchange\""));
        assert_eq!(AppMessage::from_json(&json).unwrap(), message);
    }
}
