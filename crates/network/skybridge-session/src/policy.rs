//! Handshake policy: what the local side requires from a negotiation.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use skybridge_crypto::{SelectionMode, Suite, Tier};
use skybridge_wire::{Decoder, Encoder};

/// Local negotiation requirements.
///
/// Invariant: `require_pqc` implies `!allow_classic_fallback`. The
/// recommended default is [`HandshakePolicy::strict_pqc`] on platforms with
/// native PQC and no user-selected compatibility mode, otherwise
/// [`HandshakePolicy::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePolicy {
    /// Only PQC-group suites may be negotiated.
    pub require_pqc: bool,
    /// Classic suites are acceptable when PQC is unavailable.
    pub allow_classic_fallback: bool,
    /// Minimum provider tier acceptable for the negotiated suite.
    pub minimum_tier: Tier,
    /// The peer must present a Secure Enclave proof of possession.
    pub require_se_pop: bool,
}

impl HandshakePolicy {
    /// Prefer-PQC with classic fallback.
    pub fn default_policy() -> Self {
        Self {
            require_pqc: false,
            allow_classic_fallback: true,
            minimum_tier: Tier::Classic,
            require_se_pop: false,
        }
    }

    /// Strict PQC: PQC-group suites only, no fallback.
    pub fn strict_pqc() -> Self {
        Self {
            require_pqc: true,
            allow_classic_fallback: false,
            minimum_tier: Tier::LiboqsPqc,
            require_se_pop: false,
        }
    }

    /// Classic only. Also the temporary policy used for the
    /// bootstrap-assisted recovery handshake.
    pub fn classic_only() -> Self {
        Self {
            require_pqc: false,
            allow_classic_fallback: false,
            minimum_tier: Tier::Classic,
            require_se_pop: false,
        }
    }

    /// Checks the policy invariant.
    pub fn validate(&self) -> Result<()> {
        if self.require_pqc && self.allow_classic_fallback {
            return Err(SessionError::PolicyViolation(
                "requirePQC forbids classic fallback".to_string(),
            ));
        }
        Ok(())
    }

    /// Maps the policy onto a provider selection mode.
    pub fn selection_mode(&self) -> SelectionMode {
        if self.require_pqc {
            SelectionMode::RequirePqc
        } else if self.minimum_tier == Tier::Classic && !self.allow_classic_fallback {
            SelectionMode::ClassicOnly
        } else {
            SelectionMode::PreferPqc
        }
    }

    /// Whether a suite satisfies the minimum tier. With a classic floor any
    /// suite qualifies; a PQC floor admits PQC-group suites only.
    pub fn suite_satisfies_minimum(&self, suite: Suite) -> bool {
        self.minimum_tier == Tier::Classic || suite.is_pqc_group()
    }

    /// Whether a suite is acceptable under this policy.
    pub fn permits_suite(&self, suite: Suite) -> bool {
        if !suite.is_known() {
            return false;
        }
        if self.selection_mode() == SelectionMode::ClassicOnly {
            return !suite.is_pqc_group();
        }
        self.suite_satisfies_minimum(suite) && (!self.require_pqc || suite.is_pqc_group())
    }

    /// Deterministic encoding bound into the transcript and MessageA.
    pub fn deterministic_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_bool(self.require_pqc);
        enc.put_bool(self.allow_classic_fallback);
        enc.put_u8(match self.minimum_tier {
            Tier::Classic => 0,
            Tier::LiboqsPqc => 1,
            Tier::NativePqc => 2,
        });
        enc.put_bool(self.require_se_pop);
        enc.into_bytes()
    }

    /// Parses the deterministic encoding.
    pub fn from_deterministic_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let require_pqc = dec.bool()?;
        let allow_classic_fallback = dec.bool()?;
        let minimum_tier = match dec.u8()? {
            0 => Tier::Classic,
            1 => Tier::LiboqsPqc,
            2 => Tier::NativePqc,
            other => {
                return Err(SessionError::InvalidMessageFormat(format!(
                    "unknown tier byte {other:#04x} in policy"
                )))
            }
        };
        let require_se_pop = dec.bool()?;
        dec.finish()?;
        Ok(Self { require_pqc, allow_classic_fallback, minimum_tier, require_se_pop })
    }
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_rejects_strict_pqc_with_fallback() {
        let policy = HandshakePolicy {
            require_pqc: true,
            allow_classic_fallback: true,
            minimum_tier: Tier::NativePqc,
            require_se_pop: false,
        };
        assert!(policy.validate().is_err());
        assert!(HandshakePolicy::strict_pqc().validate().is_ok());
        assert!(HandshakePolicy::default().validate().is_ok());
    }

    #[test]
    fn selection_modes() {
        assert_eq!(HandshakePolicy::default().selection_mode(), SelectionMode::PreferPqc);
        assert_eq!(HandshakePolicy::strict_pqc().selection_mode(), SelectionMode::RequirePqc);
        assert_eq!(HandshakePolicy::classic_only().selection_mode(), SelectionMode::ClassicOnly);
    }

    #[test]
    fn strict_policy_rejects_classic_suites() {
        let strict = HandshakePolicy::strict_pqc();
        assert!(strict.permits_suite(Suite::XWingMlDsa65));
        assert!(strict.permits_suite(Suite::MlKem768MlDsa65));
        assert!(!strict.permits_suite(Suite::X25519Ed25519));
        assert!(!strict.permits_suite(Suite::Unknown(0x0199)));
    }

    #[test]
    fn classic_only_policy_rejects_pqc_suites() {
        let classic = HandshakePolicy::classic_only();
        assert!(classic.permits_suite(Suite::X25519Ed25519));
        assert!(classic.permits_suite(Suite::P256Ecdsa));
        assert!(!classic.permits_suite(Suite::XWingMlDsa65));
        assert!(!classic.permits_suite(Suite::MlKem768MlDsa65));
    }

    #[test]
    fn deterministic_bytes_round_trip() {
        for policy in [
            HandshakePolicy::default(),
            HandshakePolicy::strict_pqc(),
            HandshakePolicy::classic_only(),
        ] {
            let bytes = policy.deterministic_bytes();
            assert_eq!(HandshakePolicy::from_deterministic_bytes(&bytes).unwrap(), policy);
        }
    }
}
