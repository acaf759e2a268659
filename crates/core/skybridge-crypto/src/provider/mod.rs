//! Crypto provider abstraction and tier selection.
//!
//! A provider is the implementation surface for KEM, signature and HPKE
//! operations, tagged with the [`Tier`] it runs at. Providers are created
//! per session and discarded; selection is a pure function of the policy
//! mode and the platform capabilities probed exactly once per session.

use crate::error::{CryptoError, Result};
use crate::hpke::{self, SealedBox};
use crate::identity::{KeyPair, KeyUsage};
use crate::secure_bytes::SecureBytes;
use crate::suite::{SignatureAlgorithm, Suite};
use async_trait::async_trait;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub mod classic;
#[cfg(feature = "liboqs")]
pub mod liboqs;
#[cfg(feature = "native-pqc")]
pub mod native;
pub mod unavailable;

pub use classic::ClassicProvider;
#[cfg(feature = "liboqs")]
pub use liboqs::LiboqsProvider;
#[cfg(feature = "native-pqc")]
pub use native::NativePqcProvider;
pub use unavailable::UnavailableProvider;

/// Implementation tier of a provider instance. A property of the provider,
/// not of any suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Tier {
    /// Classic elliptic-curve backend only.
    Classic,
    /// Post-quantum via the liboqs library.
    LiboqsPqc,
    /// Post-quantum via the in-process backend.
    NativePqc,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Classic => write!(f, "classic"),
            Tier::LiboqsPqc => write!(f, "liboqsPQC"),
            Tier::NativePqc => write!(f, "nativePQC"),
        }
    }
}

/// Provider selection mode derived from the handshake policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Prefer PQC, fall back to classic.
    PreferPqc,
    /// Require PQC; selection yields the unavailable sentinel otherwise.
    RequirePqc,
    /// Classic only.
    ClassicOnly,
}

/// Result of the one-per-session platform capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProbe {
    /// The in-process PQC backend is available.
    pub native_pqc: bool,
    /// The liboqs backend is available.
    pub library_pqc: bool,
}

/// Injectable platform probe. Capabilities are probed exactly once per
/// session through this interface.
pub trait ProviderEnvironment: Send + Sync {
    /// Whether the in-process PQC backend is available.
    fn check_native_pqc_available(&self) -> bool;
    /// Whether the liboqs backend is available.
    fn check_library_pqc_available(&self) -> bool;

    /// Runs both probes.
    fn probe(&self) -> CapabilityProbe {
        CapabilityProbe {
            native_pqc: self.check_native_pqc_available(),
            library_pqc: self.check_library_pqc_available(),
        }
    }
}

/// Environment that reports the compiled-in backends.
#[derive(Debug, Default, Clone)]
pub struct DefaultEnvironment;

impl ProviderEnvironment for DefaultEnvironment {
    fn check_native_pqc_available(&self) -> bool {
        cfg!(feature = "native-pqc")
    }

    fn check_library_pqc_available(&self) -> bool {
        cfg!(feature = "liboqs")
    }
}

/// Telemetry record of a provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSelection {
    /// Tier of the chosen provider, `None` for the unavailable sentinel.
    pub tier: Option<Tier>,
    /// Whether a fallback from the preferred tier occurred.
    pub fallback_occurred: bool,
    /// The probe results the selection was based on.
    pub probe: CapabilityProbe,
}

/// Handle to a long-term signing key. The key itself may live in software,
/// in a platform keystore, or behind an arbitrary signing callback.
#[derive(Clone)]
pub enum SigningKeyHandle {
    /// Raw private key bytes held in wiped memory.
    Software(SecureBytes),
    /// Opaque reference to a platform keystore entry. Ed25519 and ML-DSA-65
    /// operations reject this handle kind.
    SecureEnclaveRef(Vec<u8>),
    /// Arbitrary signing indirection (HSM, remote signer, test double).
    Callback(Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>),
}

impl fmt::Debug for SigningKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKeyHandle::Software(k) => f.debug_tuple("Software").field(&k.len()).finish(),
            SigningKeyHandle::SecureEnclaveRef(r) => {
                f.debug_tuple("SecureEnclaveRef").field(&r.len()).finish()
            }
            SigningKeyHandle::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Output of KEM encapsulation.
#[derive(Debug)]
pub struct Encapsulation {
    /// The encapsulated key to transmit.
    pub encapsulated_key: Vec<u8>,
    /// The shared secret, in wiped memory.
    pub shared_secret: SecureBytes,
}

/// The implementation surface exposed to the handshake and session layers.
///
/// KEM and signature operations are suspension points; everything else in
/// the protocol is synchronous.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Tier of this provider, `None` for the unavailable sentinel.
    fn tier(&self) -> Option<Tier>;

    /// Suites this provider can operate.
    fn supported_suites(&self) -> &[Suite];

    /// Generates a keypair for the given suite and usage.
    async fn generate_keypair(&self, suite: Suite, usage: KeyUsage) -> Result<KeyPair>;

    /// Encapsulates a fresh shared secret to the recipient's public key.
    /// Mis-sized recipient keys fail with `InvalidKeyFormat`.
    async fn kem_encapsulate(&self, suite: Suite, recipient_public: &[u8]) -> Result<Encapsulation>;

    /// Recovers the shared secret from an encapsulated key.
    async fn kem_decapsulate(
        &self,
        suite: Suite,
        encapsulated_key: &[u8],
        secret: &SecureBytes,
    ) -> Result<SecureBytes>;

    /// Signs data with the given handle.
    async fn sign(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        key: &SigningKeyHandle,
    ) -> Result<Vec<u8>>;

    /// Verifies a signature. Unparseable keys or signatures are errors,
    /// never `false`.
    async fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool>;

    /// One-shot sealed box to a recipient's KEM public key.
    async fn hpke_seal(
        &self,
        suite: Suite,
        recipient_public: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<SealedBox> {
        let encapsulation = self.kem_encapsulate(suite, recipient_public).await?;
        let key = derive_hpke_key(suite, encapsulation.shared_secret.as_ref())?;
        hpke::seal_with_key_and_enc(&key, suite, encapsulation.encapsulated_key, aad, plaintext)
    }

    /// Opens a sealed box with the recipient's KEM private key.
    async fn hpke_open(
        &self,
        suite: Suite,
        secret: &SecureBytes,
        sealed: &SealedBox,
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let shared = self.kem_decapsulate(suite, &sealed.encapsulated_key, secret).await?;
        let key = derive_hpke_key(suite, shared.as_ref())?;
        hpke::open_with_key(&key, sealed, aad)
    }
}

/// Derives the DEM key for a sealed box from a KEM shared secret.
fn derive_hpke_key(suite: Suite, shared_secret: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut info = b"skybridge-hpke-v1".to_vec();
    info.extend_from_slice(&suite.wire_id().to_le_bytes());
    let mut key = [0u8; 32];
    hk.expand(&info, &mut key)
        .map_err(|_| CryptoError::KeyExchangeFailed("HKDF expansion failed".to_string()))?;
    Ok(key)
}

/// Combines the hybrid KEM secrets into the X-Wing shared secret.
#[allow(dead_code)]
pub(crate) fn xwing_combine(
    ss_mlkem: &[u8],
    ss_x25519: &[u8],
    ct_mlkem: &[u8],
    ephemeral_pub: &[u8],
    recipient_x_pub: &[u8],
) -> SecureBytes {
    let mut hasher = Sha256::new();
    hasher.update(b"SkyBridge-XWing-Combiner-v1");
    hasher.update(ss_mlkem);
    hasher.update(ss_x25519);
    hasher.update(ct_mlkem);
    hasher.update(ephemeral_pub);
    hasher.update(recipient_x_pub);
    SecureBytes::new(hasher.finalize().to_vec())
}

fn native_provider() -> Option<Arc<dyn CryptoProvider>> {
    #[cfg(feature = "native-pqc")]
    {
        Some(Arc::new(NativePqcProvider::new()))
    }
    #[cfg(not(feature = "native-pqc"))]
    {
        None
    }
}

fn library_provider() -> Option<Arc<dyn CryptoProvider>> {
    #[cfg(feature = "liboqs")]
    {
        Some(Arc::new(LiboqsProvider::new()))
    }
    #[cfg(not(feature = "liboqs"))]
    {
        None
    }
}

/// Selects a provider for the session.
///
/// `preferPQC`: native → library → classic. `requirePQC`: native → library →
/// unavailable sentinel. `classicOnly`: classic. The returned selection
/// record carries the chosen tier, whether a fallback occurred, and the
/// probe results for telemetry.
pub fn select_provider(
    mode: SelectionMode,
    environment: &dyn ProviderEnvironment,
) -> (Arc<dyn CryptoProvider>, ProviderSelection) {
    let probe = environment.probe();

    let (provider, tier): (Arc<dyn CryptoProvider>, Option<Tier>) = match mode {
        SelectionMode::ClassicOnly => (Arc::new(ClassicProvider::new()), Some(Tier::Classic)),
        SelectionMode::PreferPqc | SelectionMode::RequirePqc => {
            if let Some(native) = probe.native_pqc.then(native_provider).flatten() {
                (native, Some(Tier::NativePqc))
            } else if let Some(library) = probe.library_pqc.then(library_provider).flatten() {
                (library, Some(Tier::LiboqsPqc))
            } else if mode == SelectionMode::PreferPqc {
                (Arc::new(ClassicProvider::new()), Some(Tier::Classic))
            } else {
                (Arc::new(UnavailableProvider::new()), None)
            }
        }
    };

    let fallback_occurred = match mode {
        SelectionMode::ClassicOnly => false,
        SelectionMode::PreferPqc | SelectionMode::RequirePqc => tier != Some(Tier::NativePqc),
    };

    let selection = ProviderSelection { tier, fallback_occurred, probe };
    info!(
        tier = %tier.map(|t| t.to_string()).unwrap_or_else(|| "unavailable".to_string()),
        fallback = fallback_occurred,
        native_probe = probe.native_pqc,
        library_probe = probe.library_pqc,
        "crypto provider selected"
    );
    (provider, selection)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEnvironment {
        native: bool,
        library: bool,
    }

    impl ProviderEnvironment for FixedEnvironment {
        fn check_native_pqc_available(&self) -> bool {
            self.native
        }
        fn check_library_pqc_available(&self) -> bool {
            self.library
        }
    }

    #[test]
    fn classic_only_selects_classic() {
        let env = FixedEnvironment { native: true, library: true };
        let (provider, selection) = select_provider(SelectionMode::ClassicOnly, &env);
        assert_eq!(provider.tier(), Some(Tier::Classic));
        assert_eq!(selection.tier, Some(Tier::Classic));
        assert!(!selection.fallback_occurred);
    }

    #[cfg(feature = "native-pqc")]
    #[test]
    fn prefer_pqc_selects_native_when_probed() {
        let env = FixedEnvironment { native: true, library: false };
        let (provider, selection) = select_provider(SelectionMode::PreferPqc, &env);
        assert_eq!(provider.tier(), Some(Tier::NativePqc));
        assert!(!selection.fallback_occurred);
    }

    #[test]
    fn prefer_pqc_falls_back_to_classic() {
        let env = FixedEnvironment { native: false, library: false };
        let (provider, selection) = select_provider(SelectionMode::PreferPqc, &env);
        assert_eq!(provider.tier(), Some(Tier::Classic));
        assert!(selection.fallback_occurred);
    }

    #[test]
    fn require_pqc_yields_unavailable_sentinel() {
        let env = FixedEnvironment { native: false, library: false };
        let (provider, selection) = select_provider(SelectionMode::RequirePqc, &env);
        assert_eq!(provider.tier(), None);
        assert_eq!(selection.tier, None);
        assert!(selection.fallback_occurred);
    }

    #[tokio::test]
    async fn unavailable_sentinel_fails_operations() {
        let env = FixedEnvironment { native: false, library: false };
        let (provider, _) = select_provider(SelectionMode::RequirePqc, &env);
        let err = provider
            .generate_keypair(Suite::MlKem768MlDsa65, KeyUsage::KeyExchange)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::ProviderNotAvailable(_)));
    }
}
