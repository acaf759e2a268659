//! Algorithm suite registry.
//!
//! A suite is a (KEM, signature, AEAD) triple identified by a 16-bit wire
//! ID. The ID space is partitioned by high byte: `0x00xx` hybrid-PQC,
//! `0x01xx` pure-PQC, `0x10xx` classic, `0xF0xx` experimental. Unknown IDs
//! are not parse errors; they are carried losslessly so newer peers can
//! offer suites older code merely declines.
//!
//! The byte lengths in this module are authoritative for all wire-visible
//! key material. Message parsers and provider input validation enforce them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An algorithm suite, keyed by its wire identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suite {
    /// X-Wing hybrid KEM (X25519 ‖ ML-KEM-768) with ML-DSA-65 signatures.
    XWingMlDsa65,

    /// Pure ML-KEM-768 with ML-DSA-65 signatures.
    MlKem768MlDsa65,

    /// Classic X25519 key agreement with Ed25519 signatures.
    X25519Ed25519,

    /// Legacy P-256 ECDH with P-256 ECDSA signatures.
    P256Ecdsa,

    /// A suite this implementation does not know. Carried for display and
    /// forward compatibility; negotiating it is an error.
    Unknown(u16),
}

/// Suite families derived from the wire-ID partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteFamily {
    /// `0x00xx`: hybrid classical + post-quantum.
    HybridPqc,
    /// `0x01xx`: pure post-quantum.
    PurePqc,
    /// `0x10xx`: classic elliptic-curve.
    Classic,
    /// `0xF0xx`: experimental.
    Experimental,
    /// Anything else.
    Unknown,
}

/// Signature algorithms used by identity keys and suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Ed25519.
    Ed25519,
    /// ML-DSA-65 (FIPS 204).
    MlDsa65,
    /// P-256 ECDSA (legacy identities and Secure Enclave keys).
    P256Ecdsa,
}

impl Suite {
    /// Known suites in default negotiation priority order.
    pub const SUPPORTED: [Suite; 4] = [
        Suite::XWingMlDsa65,
        Suite::MlKem768MlDsa65,
        Suite::X25519Ed25519,
        Suite::P256Ecdsa,
    ];

    /// Maps a wire ID to a suite. Unknown IDs are preserved, never errors.
    pub fn from_wire_id(id: u16) -> Self {
        match id {
            0x0001 => Suite::XWingMlDsa65,
            0x0101 => Suite::MlKem768MlDsa65,
            0x1001 => Suite::X25519Ed25519,
            0x1002 => Suite::P256Ecdsa,
            other => Suite::Unknown(other),
        }
    }

    /// The 16-bit wire identifier.
    pub fn wire_id(&self) -> u16 {
        match self {
            Suite::XWingMlDsa65 => 0x0001,
            Suite::MlKem768MlDsa65 => 0x0101,
            Suite::X25519Ed25519 => 0x1001,
            Suite::P256Ecdsa => 0x1002,
            Suite::Unknown(id) => *id,
        }
    }

    /// Whether this is a suite this implementation can operate.
    pub fn is_known(&self) -> bool {
        !matches!(self, Suite::Unknown(_))
    }

    /// Family classification from the wire-ID high byte.
    pub fn family(&self) -> SuiteFamily {
        match self.wire_id() >> 8 {
            0x00 => SuiteFamily::HybridPqc,
            0x01 => SuiteFamily::PurePqc,
            0x10 => SuiteFamily::Classic,
            0xF0 => SuiteFamily::Experimental,
            _ => SuiteFamily::Unknown,
        }
    }

    /// Whether this suite belongs to the PQC group (hybrid or pure PQC).
    pub fn is_pqc_group(&self) -> bool {
        matches!(self.wire_id() >> 8, 0x00 | 0x01)
    }

    /// The signature algorithm bound to this suite.
    pub fn signature_algorithm(&self) -> Option<SignatureAlgorithm> {
        match self {
            Suite::XWingMlDsa65 | Suite::MlKem768MlDsa65 => Some(SignatureAlgorithm::MlDsa65),
            Suite::X25519Ed25519 => Some(SignatureAlgorithm::Ed25519),
            Suite::P256Ecdsa => Some(SignatureAlgorithm::P256Ecdsa),
            Suite::Unknown(_) => None,
        }
    }

    /// KEM public key length in bytes.
    pub fn kem_public_len(&self) -> Option<usize> {
        match self {
            Suite::XWingMlDsa65 => Some(1216),
            Suite::MlKem768MlDsa65 => Some(1184),
            Suite::X25519Ed25519 => Some(32),
            Suite::P256Ecdsa => Some(65),
            Suite::Unknown(_) => None,
        }
    }

    /// Accepted KEM private key lengths. PQC suites accept both the
    /// seed form and the expanded backend form.
    pub fn kem_secret_lens(&self) -> &'static [usize] {
        match self {
            Suite::XWingMlDsa65 => &[2432],
            Suite::MlKem768MlDsa65 => &[96, 2400],
            Suite::X25519Ed25519 => &[32],
            Suite::P256Ecdsa => &[32],
            Suite::Unknown(_) => &[],
        }
    }

    /// Signature public key length in bytes.
    pub fn sig_public_len(&self) -> Option<usize> {
        match self {
            Suite::XWingMlDsa65 | Suite::MlKem768MlDsa65 => Some(1952),
            Suite::X25519Ed25519 => Some(32),
            Suite::P256Ecdsa => Some(65),
            Suite::Unknown(_) => None,
        }
    }

    /// Accepted signature private key lengths.
    pub fn sig_secret_lens(&self) -> &'static [usize] {
        match self {
            Suite::XWingMlDsa65 => &[4032],
            Suite::MlKem768MlDsa65 => &[64, 4032],
            Suite::X25519Ed25519 => &[32, 64],
            Suite::P256Ecdsa => &[32],
            Suite::Unknown(_) => &[],
        }
    }

    /// Length of the initiator's A→B key share.
    ///
    /// PQC suites carry the KEM ciphertext (hybrid: ciphertext plus the
    /// ephemeral X25519 public); classic suites carry an ephemeral public.
    pub fn initiator_share_len(&self) -> Option<usize> {
        match self {
            Suite::XWingMlDsa65 => Some(1120),
            Suite::MlKem768MlDsa65 => Some(1088),
            Suite::X25519Ed25519 => Some(32),
            Suite::P256Ecdsa => Some(65),
            Suite::Unknown(_) => None,
        }
    }

    /// Length of the responder's B→A share. Empty for PQC suites, an
    /// ephemeral public for classic suites.
    pub fn responder_share_len(&self) -> Option<usize> {
        match self {
            Suite::XWingMlDsa65 | Suite::MlKem768MlDsa65 => Some(0),
            Suite::X25519Ed25519 => Some(32),
            Suite::P256Ecdsa => Some(65),
            Suite::Unknown(_) => None,
        }
    }

    /// Canonical suite name.
    pub fn name(&self) -> String {
        match self {
            Suite::XWingMlDsa65 => "X-Wing+ML-DSA-65".to_string(),
            Suite::MlKem768MlDsa65 => "ML-KEM-768+ML-DSA-65".to_string(),
            Suite::X25519Ed25519 => "X25519+Ed25519".to_string(),
            Suite::P256Ecdsa => "P-256+ECDSA".to_string(),
            Suite::Unknown(id) => format!("unknown({id:#06x})"),
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl SignatureAlgorithm {
    /// Public key length in bytes.
    pub fn public_key_len(&self) -> usize {
        match self {
            SignatureAlgorithm::Ed25519 => 32,
            SignatureAlgorithm::MlDsa65 => 1952,
            SignatureAlgorithm::P256Ecdsa => 65,
        }
    }

    /// Signature length in bytes (ECDSA travels as fixed r||s).
    pub fn signature_len(&self) -> usize {
        match self {
            SignatureAlgorithm::Ed25519 => 64,
            SignatureAlgorithm::MlDsa65 => 3309,
            SignatureAlgorithm::P256Ecdsa => 64,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::Ed25519 => write!(f, "Ed25519"),
            SignatureAlgorithm::MlDsa65 => write!(f, "ML-DSA-65"),
            SignatureAlgorithm::P256Ecdsa => write!(f, "P-256-ECDSA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_round_trip() {
        for suite in Suite::SUPPORTED {
            assert_eq!(Suite::from_wire_id(suite.wire_id()), suite);
        }
    }

    #[test]
    fn unknown_ids_are_preserved() {
        let suite = Suite::from_wire_id(0xF042);
        assert_eq!(suite, Suite::Unknown(0xF042));
        assert_eq!(suite.wire_id(), 0xF042);
        assert_eq!(suite.family(), SuiteFamily::Experimental);
        assert!(!suite.is_known());
    }

    #[test]
    fn pqc_group_follows_high_byte() {
        assert!(Suite::XWingMlDsa65.is_pqc_group());
        assert!(Suite::MlKem768MlDsa65.is_pqc_group());
        assert!(!Suite::X25519Ed25519.is_pqc_group());
        assert!(!Suite::P256Ecdsa.is_pqc_group());
        assert!(Suite::Unknown(0x0177).is_pqc_group());
        assert!(!Suite::Unknown(0xF001).is_pqc_group());
    }

    #[test]
    fn length_table_matches_protocol() {
        assert_eq!(Suite::XWingMlDsa65.kem_public_len(), Some(1216));
        assert_eq!(Suite::XWingMlDsa65.initiator_share_len(), Some(1120));
        assert_eq!(Suite::XWingMlDsa65.responder_share_len(), Some(0));
        assert_eq!(Suite::MlKem768MlDsa65.kem_public_len(), Some(1184));
        assert_eq!(Suite::MlKem768MlDsa65.initiator_share_len(), Some(1088));
        assert_eq!(Suite::X25519Ed25519.responder_share_len(), Some(32));
        assert_eq!(Suite::P256Ecdsa.initiator_share_len(), Some(65));
        assert_eq!(Suite::Unknown(0x4444).kem_public_len(), None);
    }

    #[test]
    fn families_partition_by_high_byte() {
        assert_eq!(Suite::XWingMlDsa65.family(), SuiteFamily::HybridPqc);
        assert_eq!(Suite::MlKem768MlDsa65.family(), SuiteFamily::PurePqc);
        assert_eq!(Suite::X25519Ed25519.family(), SuiteFamily::Classic);
        assert_eq!(Suite::Unknown(0x4242).family(), SuiteFamily::Unknown);
    }
}
