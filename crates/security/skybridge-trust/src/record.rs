//! Trust records: signed per-peer identity snapshots with add/revoke
//! semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skybridge_wire::Encoder;

/// Hex serialization for key bytes in the keychain JSON form.
mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod serde_hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| hex::decode(&s).map_err(serde::de::Error::custom)).transpose()
    }
}

/// Platform attestation level attached to a peer identity. Only a tag that
/// influences risk scoring; attestation itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttestationLevel {
    /// No attestation.
    #[serde(rename = "none")]
    None,
    /// DeviceCheck-backed.
    #[serde(rename = "deviceCheck")]
    DeviceCheck,
    /// App Attest-backed.
    #[serde(rename = "appAttest")]
    AppAttest,
}

impl AttestationLevel {
    /// Single-byte encoding used in the signing preimage.
    pub fn as_byte(&self) -> u8 {
        match self {
            AttestationLevel::None => 0,
            AttestationLevel::DeviceCheck => 1,
            AttestationLevel::AppAttest => 2,
        }
    }
}

/// Whether a record asserts or revokes trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    /// Asserts trust in the peer.
    #[serde(rename = "add")]
    Add,
    /// Tombstone: revokes trust and dominates adds during sync.
    #[serde(rename = "revoke")]
    Revoke,
}

impl RecordType {
    /// String form used in the signing preimage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Add => "add",
            RecordType::Revoke => "revoke",
        }
    }
}

/// A peer's KEM public key for one suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemPublicKeyInfo {
    /// Suite wire ID the key belongs to.
    #[serde(rename = "suiteWireId")]
    pub suite_wire_id: u16,
    /// The KEM public key.
    #[serde(rename = "publicKey", with = "serde_hex")]
    pub public_key: Vec<u8>,
}

/// A signed per-peer trust record.
///
/// Dates serialize as milliseconds since the Unix epoch; key bytes as hex.
/// The keychain value is the deterministic sorted-key JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    /// Stable device identifier.
    pub device_id: String,
    /// SHA-256 hex fingerprint of the identity public key.
    pub pub_key_fingerprint: String,
    /// The peer's identity public key.
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    /// Optional Secure Enclave public key.
    #[serde(with = "serde_hex_opt", skip_serializing_if = "Option::is_none", default)]
    pub secure_enclave_public_key: Option<Vec<u8>>,
    /// KEM public keys, one per supported suite.
    pub kem_public_keys: Vec<KemPublicKeyInfo>,
    /// Attestation level tag.
    pub attestation_level: AttestationLevel,
    /// Peer capability strings.
    pub capabilities: Vec<String>,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Last update time; drives last-writer-wins merging.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Monotonic version, bumped on every signed mutation.
    pub version: u64,
    /// Signature by the local identity key over the signing preimage.
    #[serde(with = "serde_hex")]
    pub signature: Vec<u8>,
    /// Add or revoke.
    pub record_type: RecordType,
    /// When trust was revoked; set on tombstones.
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Display name for UI purposes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_name: Option<String>,
}

impl TrustRecord {
    /// SHA-256 hex fingerprint of a public key.
    pub fn fingerprint_of(public_key: &[u8]) -> String {
        hex::encode(Sha256::digest(public_key))
    }

    /// Whether this record is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.record_type == RecordType::Revoke
    }

    /// Deterministic signing preimage.
    ///
    /// KEM keys are ordered by suite wire ID so the preimage is independent
    /// of their in-memory order.
    pub fn signing_preimage(&self) -> Vec<u8> {
        let mut kem_keys = self.kem_public_keys.clone();
        kem_keys.sort_by_key(|k| k.suite_wire_id);

        let mut enc = Encoder::new();
        enc.put_string(&self.device_id);
        enc.put_string(&self.pub_key_fingerprint);
        enc.put_bytes(&self.public_key);
        enc.put_optional(self.secure_enclave_public_key.as_ref(), |e, key| {
            e.put_bytes(key)
        });
        enc.put_array(&kem_keys, |e, key| {
            e.put_u16(key.suite_wire_id);
            e.put_bytes(&key.public_key);
        });
        enc.put_u8(self.attestation_level.as_byte());
        enc.put_array(&self.capabilities, |e, cap| e.put_string(cap));
        enc.put_date(self.created_at);
        enc.put_date(self.updated_at);
        enc.put_u64(self.version);
        enc.put_string(self.record_type.as_str());
        enc.into_bytes()
    }
}

/// Merges a local and a remote record for the same device.
///
/// Revoke dominates add; between records of the same type the later
/// `updated_at` wins, with the higher version breaking ties.
pub fn resolve_conflict(local: TrustRecord, remote: TrustRecord) -> TrustRecord {
    debug_assert_eq!(local.device_id, remote.device_id);
    match (local.is_tombstone(), remote.is_tombstone()) {
        (true, false) => local,
        (false, true) => remote,
        _ => {
            if (remote.updated_at, remote.version) > (local.updated_at, local.version) {
                remote
            } else {
                local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> TrustRecord {
        TrustRecord {
            device_id: "device-a".to_string(),
            pub_key_fingerprint: TrustRecord::fingerprint_of(&[1, 2, 3]),
            public_key: vec![1, 2, 3],
            secure_enclave_public_key: None,
            kem_public_keys: vec![
                KemPublicKeyInfo { suite_wire_id: 0x0101, public_key: vec![9; 4] },
                KemPublicKeyInfo { suite_wire_id: 0x0001, public_key: vec![8; 4] },
            ],
            attestation_level: AttestationLevel::AppAttest,
            capabilities: vec!["pqc".to_string()],
            created_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            updated_at: Utc.timestamp_millis_opt(1_700_000_001_000).unwrap(),
            version: 1,
            signature: vec![0xFF; 8],
            record_type: RecordType::Add,
            revoked_at: None,
            device_name: Some("Studio".to_string()),
        }
    }

    #[test]
    fn preimage_orders_kem_keys_by_suite_id() {
        let record = sample_record();
        let mut reordered = record.clone();
        reordered.kem_public_keys.reverse();
        assert_eq!(record.signing_preimage(), reordered.signing_preimage());
    }

    #[test]
    fn preimage_excludes_signature() {
        let record = sample_record();
        let mut resigned = record.clone();
        resigned.signature = vec![0x00; 8];
        assert_eq!(record.signing_preimage(), resigned.signing_preimage());
    }

    #[test]
    fn preimage_covers_record_type() {
        let record = sample_record();
        let mut revoked = record.clone();
        revoked.record_type = RecordType::Revoke;
        assert_ne!(record.signing_preimage(), revoked.signing_preimage());
    }

    #[test]
    fn revoke_dominates_regardless_of_order() {
        let add = sample_record();
        let mut revoke = sample_record();
        revoke.record_type = RecordType::Revoke;
        revoke.version = 2;
        revoke.revoked_at = Some(revoke.updated_at);
        // An older revoke still wins against a newer add.
        revoke.updated_at = add.updated_at - chrono::Duration::seconds(10);

        let merged = resolve_conflict(add.clone(), revoke.clone());
        assert!(merged.is_tombstone());
        let merged = resolve_conflict(revoke.clone(), add);
        assert!(merged.is_tombstone());
        assert_eq!(merged.revoked_at, revoke.revoked_at);
    }

    #[test]
    fn later_writer_wins_between_adds() {
        let older = sample_record();
        let mut newer = sample_record();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        newer.version = 3;
        newer.capabilities.push("video".to_string());

        let merged = resolve_conflict(older.clone(), newer.clone());
        assert_eq!(merged, newer);
        let merged = resolve_conflict(newer.clone(), older);
        assert_eq!(merged, newer);
    }

    #[test]
    fn json_dates_are_millisecond_epochs() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["createdAt"], serde_json::json!(1_700_000_000_000i64));
        assert_eq!(value["updatedAt"], serde_json::json!(1_700_000_001_000i64));
    }

    #[test]
    fn json_round_trip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TrustRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
