//! The two-message handshake driver.
//!
//! MessageA (initiator → responder) offers suites and key shares; MessageB
//! (responder → initiator) selects a suite, carries the responder share and
//! a sealed profile payload; both sides then exchange Finished MACs bound
//! to the transcript. Only `Established` yields session keys.
//!
//! For PQC suites the initiator encapsulates to the responder's published
//! KEM identity key, so the A→B share is the KEM ciphertext and the B→A
//! share is empty; classic suites carry ephemeral publics both ways.

use crate::error::{Result, SessionError};
use crate::messages::{
    decode_capabilities, encode_capabilities, Finished, KeyShare, MessageA, MessageB,
    NegotiatedProfile, DIRECTION_INITIATOR_TO_RESPONDER, DIRECTION_RESPONDER_TO_INITIATOR,
};
use crate::policy::HandshakePolicy;
use crate::replay::ReplayCache;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::transcript::{MessageType, Role, TranscriptBuilder, PROTOCOL_VERSION};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use skybridge_crypto::hpke;
use skybridge_crypto::{
    AeadAlgorithm, CryptoProvider, IdentityPublicKeys, KeyUsage, SecureBytes,
    SignatureAlgorithm, SigningKeyHandle, Suite,
};
use skybridge_trust::{KemPublicKeyInfo, TrustRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const INFO_SEND_INITIATOR: &[u8] = b"skybridge-control-v1||initiator";
const INFO_SEND_RESPONDER: &[u8] = b"skybridge-control-v1||responder";
const INFO_FINISHED: &[u8] = b"skybridge-finished-v1";
const INFO_MESSAGE_B: &[u8] = b"skybridge-msgb-v1";

/// Classification of an established session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssuranceLevel {
    /// PQC-group suite negotiated directly.
    PqcStrict,
    /// PQC reached via the one-time bootstrap-assisted recovery.
    BootstrapAssisted,
    /// Classic suite.
    LegacyClassic,
}

/// A long-term KEM identity keypair for one suite.
#[derive(Debug)]
pub struct KemIdentity {
    /// The published public key.
    pub public: Vec<u8>,
    /// The private key, zeroized on drop.
    pub secret: SecureBytes,
}

/// The local device's handshake identity.
pub struct LocalIdentity {
    /// Stable device identifier.
    pub device_id: String,
    /// Identity signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Identity public keys in wire form.
    pub identity_keys: IdentityPublicKeys,
    /// Handle to the identity signing key.
    pub signing_handle: SigningKeyHandle,
    /// Optional Secure Enclave signing handle for proof of possession.
    pub se_signing_handle: Option<SigningKeyHandle>,
    /// Long-term KEM identity keypairs, keyed by suite wire ID.
    pub kem_identities: HashMap<u16, KemIdentity>,
    /// Local capability strings.
    pub capabilities: Vec<String>,
}

impl LocalIdentity {
    /// Generates a fresh identity: a signing keypair for `algorithm` and a
    /// KEM identity for every PQC suite in `suites`.
    pub async fn generate(
        provider: &dyn CryptoProvider,
        device_id: impl Into<String>,
        algorithm: SignatureAlgorithm,
        suites: &[Suite],
        capabilities: Vec<String>,
    ) -> Result<Self> {
        let signing_suite = match algorithm {
            SignatureAlgorithm::MlDsa65 => Suite::MlKem768MlDsa65,
            SignatureAlgorithm::Ed25519 => Suite::X25519Ed25519,
            SignatureAlgorithm::P256Ecdsa => Suite::P256Ecdsa,
        };
        let signing_pair = provider.generate_keypair(signing_suite, KeyUsage::Signing).await?;
        let identity_keys =
            IdentityPublicKeys::new(algorithm, signing_pair.public.clone(), None)?;

        let mut kem_identities = HashMap::new();
        for suite in suites {
            if suite.is_pqc_group() && provider.supported_suites().contains(suite) {
                let pair = provider.generate_keypair(*suite, KeyUsage::KeyExchange).await?;
                kem_identities.insert(
                    suite.wire_id(),
                    KemIdentity { public: pair.public, secret: pair.secret },
                );
            }
        }

        Ok(Self {
            device_id: device_id.into(),
            algorithm,
            identity_keys,
            signing_handle: SigningKeyHandle::Software(signing_pair.secret),
            se_signing_handle: None,
            kem_identities,
            capabilities,
        })
    }

    /// The published KEM public keys, for trust records and pairing
    /// identity exchange.
    pub fn kem_public_keys(&self) -> Vec<KemPublicKeyInfo> {
        let mut keys: Vec<KemPublicKeyInfo> = self
            .kem_identities
            .iter()
            .map(|(id, identity)| KemPublicKeyInfo {
                suite_wire_id: *id,
                public_key: identity.public.clone(),
            })
            .collect();
        keys.sort_by_key(|k| k.suite_wire_id);
        keys
    }
}

/// Directional keys and context of an established session.
#[derive(Debug)]
pub struct SessionKeys {
    /// AEAD key for the local send direction.
    pub send_key: SecureBytes,
    /// AEAD key for the local receive direction.
    pub receive_key: SecureBytes,
    /// The negotiated suite.
    pub negotiated_suite: Suite,
    /// AEAD carried in the negotiated profile.
    pub aead: AeadAlgorithm,
    /// Session assurance classification.
    pub assurance: AssuranceLevel,
    /// Replay-protection handshake ID.
    pub handshake_id: [u8; 32],
    /// The peer's identity public keys.
    pub peer_identity: IdentityPublicKeys,
    /// SHA-256 hex fingerprint of the peer identity key.
    pub peer_fingerprint: String,
    /// The peer's capability strings.
    pub peer_capabilities: Vec<String>,
}

fn random_nonce() -> Result<[u8; 32]> {
    let mut nonce = [0u8; 32];
    getrandom::getrandom(&mut nonce).map_err(|_| SessionError::RandomGenerationFailed)?;
    Ok(nonce)
}

fn key_schedule(shared: &SecureBytes, server_nonce: &[u8; 32], client_nonce: &[u8; 32]) -> Hkdf<Sha256> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(server_nonce);
    salt[32..].copy_from_slice(client_nonce);
    Hkdf::<Sha256>::new(Some(&salt), shared.as_ref())
}

fn expand_key(km: &Hkdf<Sha256>, info: &[u8]) -> Result<SecureBytes> {
    let mut key = vec![0u8; 32];
    km.expand(info, &mut key).map_err(|_| {
        SessionError::Crypto(skybridge_crypto::CryptoError::KeyExchangeFailed(
            "HKDF expansion failed".to_string(),
        ))
    })?;
    Ok(SecureBytes::new(key))
}

fn finished_mac(finished_key: &SecureBytes, transcript_hash: &[u8; 32], direction: u8) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(finished_key.as_ref())
        .expect("HMAC accepts any key length");
    mac.update(transcript_hash);
    mac.update(&[direction]);
    mac.finalize().into_bytes().into()
}

fn mac_matches(expected: &[u8; 32], presented: &[u8; 32]) -> bool {
    use subtle::ConstantTimeEq;
    expected.ct_eq(presented).into()
}

/// `handshakeId = SHA-256(clientNonce || serverNonce || suiteWireId LE)`.
pub fn compute_handshake_id(
    client_nonce: &[u8; 32],
    server_nonce: &[u8; 32],
    suite_wire_id: u16,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(client_nonce);
    hasher.update(server_nonce);
    hasher.update(suite_wire_id.to_le_bytes());
    hasher.finalize().into()
}

fn se_preimage(label: &[u8], signature_input: &[u8]) -> Vec<u8> {
    let mut out = label.to_vec();
    out.extend_from_slice(&Sha256::digest(signature_input));
    out
}

async fn verify_identity_signature(
    provider: &dyn CryptoProvider,
    identity: &IdentityPublicKeys,
    data: &[u8],
    signature: &[u8],
) -> Result<bool> {
    Ok(provider
        .verify(identity.algorithm, data, signature, &identity.protocol_public_key)
        .await?)
}

async fn verify_se_signature(
    provider: &dyn CryptoProvider,
    identity: &IdentityPublicKeys,
    label: &[u8],
    signature_input: &[u8],
    se_signature: &[u8],
    required: bool,
) -> Result<()> {
    let se_key = match &identity.secure_enclave_public_key {
        Some(key) => key,
        None => {
            if required {
                return Err(SessionError::AuthFailed(
                    "secure enclave proof of possession required but absent".to_string(),
                ));
            }
            return Ok(());
        }
    };
    if se_signature.is_empty() {
        if required {
            return Err(SessionError::AuthFailed(
                "secure enclave proof of possession required but absent".to_string(),
            ));
        }
        return Ok(());
    }
    let preimage = se_preimage(label, signature_input);
    let valid = provider
        .verify(SignatureAlgorithm::P256Ecdsa, &preimage, se_signature, se_key)
        .await?;
    if valid {
        Ok(())
    } else {
        Err(SessionError::AuthFailed("secure enclave signature invalid".to_string()))
    }
}

enum PendingShare {
    Pqc { shared: SecureBytes },
    Classic { ephemeral_secret: SecureBytes },
}

enum InitiatorState {
    Idle,
    SentA {
        client_nonce: [u8; 32],
        pending: HashMap<u16, PendingShare>,
    },
    AwaitingFinished {
        finished_key: SecureBytes,
        keys: SessionKeys,
    },
    Established,
    Failed,
}

/// Initiator side of the handshake.
///
/// State machine: `Idle → SentA → (valid B) → AwaitingFinished →
/// (peer Finished) → Established`.
pub struct Initiator {
    provider: Arc<dyn CryptoProvider>,
    policy: HandshakePolicy,
    identity: Arc<LocalIdentity>,
    peer_kem_keys: Vec<KemPublicKeyInfo>,
    offered_suites: Vec<Suite>,
    telemetry: Arc<dyn TelemetrySink>,
    transcript: TranscriptBuilder,
    state: InitiatorState,
}

impl Initiator {
    /// Creates an initiator.
    ///
    /// `peer_kem_keys` are the responder's published KEM identity keys from
    /// the trust store or the bootstrap cache; without an entry for a PQC
    /// suite that suite cannot be offered with a share.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        policy: HandshakePolicy,
        identity: Arc<LocalIdentity>,
        peer_kem_keys: Vec<KemPublicKeyInfo>,
        offered_suites: Vec<Suite>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            provider,
            policy,
            identity,
            peer_kem_keys,
            offered_suites,
            telemetry,
            transcript: TranscriptBuilder::new(Role::Initiator),
            state: InitiatorState::Idle,
        }
    }

    fn peer_kem_key_for(&self, suite: Suite) -> Option<&KemPublicKeyInfo> {
        self.peer_kem_keys.iter().find(|k| k.suite_wire_id == suite.wire_id())
    }

    /// Builds and signs MessageA. Fails with `SuiteNegotiationFailed` when
    /// policy leaves nothing offerable (the bootstrap-assisted trigger for
    /// strict-PQC policies without the peer's KEM identity).
    pub async fn create_message_a(&mut self) -> Result<Vec<u8>> {
        if !matches!(self.state, InitiatorState::Idle) {
            return Err(SessionError::InvalidState("MessageA already sent".to_string()));
        }
        self.policy.validate()?;

        let offered: Vec<Suite> = self
            .offered_suites
            .iter()
            .copied()
            .filter(|s| self.policy.permits_suite(*s))
            .filter(|s| self.provider.supported_suites().contains(s))
            .collect();

        let mut pending = HashMap::new();
        let mut key_shares = Vec::new();
        for suite in &offered {
            if suite.is_pqc_group() {
                let Some(peer_key) = self.peer_kem_key_for(*suite) else {
                    debug!(suite = %suite, "no peer KEM identity; offering without share");
                    continue;
                };
                let encapsulation =
                    self.provider.kem_encapsulate(*suite, &peer_key.public_key).await?;
                key_shares.push(KeyShare {
                    suite_wire_id: suite.wire_id(),
                    share: encapsulation.encapsulated_key,
                });
                pending.insert(
                    suite.wire_id(),
                    PendingShare::Pqc { shared: encapsulation.shared_secret },
                );
            } else {
                let ephemeral =
                    self.provider.generate_keypair(*suite, KeyUsage::KeyExchange).await?;
                key_shares.push(KeyShare { suite_wire_id: suite.wire_id(), share: ephemeral.public });
                pending.insert(
                    suite.wire_id(),
                    PendingShare::Classic { ephemeral_secret: ephemeral.secret },
                );
            }
        }

        if key_shares.is_empty() {
            self.telemetry.emit(TelemetryEvent::SuiteNegotiationFailed);
            self.state = InitiatorState::Failed;
            return Err(SessionError::SuiteNegotiationFailed);
        }

        let client_nonce = random_nonce().inspect_err(|_| {
            self.telemetry.emit(TelemetryEvent::RandomGenerationFailure);
        })?;

        let capabilities = encode_capabilities(&self.identity.capabilities);
        let policy_blob = self.policy.deterministic_bytes();
        self.transcript.set_policy(policy_blob.clone());
        self.transcript.set_local_capabilities(capabilities.clone());

        let mut message = MessageA {
            protocol_version: PROTOCOL_VERSION,
            supported_suites: offered.iter().map(|s| s.wire_id()).collect(),
            key_shares,
            client_nonce,
            capabilities,
            policy: policy_blob,
            identity: self.identity.identity_keys.clone(),
            signature: Vec::new(),
            se_signature: Vec::new(),
        };

        let signing_input = message.signing_bytes();
        message.signature = self
            .provider
            .sign(self.identity.algorithm, &signing_input, &self.identity.signing_handle)
            .await?;
        if let Some(se_handle) = &self.identity.se_signing_handle {
            let preimage = se_preimage(b"SkyBridge-SE-A", &signing_input);
            message.se_signature =
                self.provider.sign(SignatureAlgorithm::P256Ecdsa, &preimage, se_handle).await?;
        }

        let encoded = message.encode();
        self.transcript.append(MessageType::HandshakeA, &encoded)?;
        self.state = InitiatorState::SentA { client_nonce, pending };
        debug!(suites = ?message.supported_suites, "MessageA created");
        Ok(encoded)
    }

    /// Processes MessageB, verifying the responder's signature and the
    /// transcript binding, and returns the local Finished message to send.
    pub async fn handle_message_b(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        let (client_nonce, mut pending) =
            match std::mem::replace(&mut self.state, InitiatorState::Failed) {
                InitiatorState::SentA { client_nonce, pending } => (client_nonce, pending),
                _ => return Err(SessionError::InvalidState("MessageB before MessageA".to_string())),
            };

        let message = MessageB::decode(bytes)?;
        let suite = Suite::from_wire_id(message.selected_suite);

        if !suite.is_known() {
            return Err(SessionError::SuiteNegotiationFailed);
        }
        if self.policy.require_pqc && !suite.is_pqc_group() {
            self.telemetry.emit(TelemetryEvent::PolicyRejected { suite });
            return Err(SessionError::Downgrade(format!(
                "policy requires PQC but responder selected {suite}"
            )));
        }
        if !self.policy.permits_suite(suite) {
            self.telemetry.emit(TelemetryEvent::PolicyRejected { suite });
            return Err(SessionError::PolicyViolation(format!("suite {suite} not permitted")));
        }

        let shared = match pending.remove(&message.selected_suite) {
            Some(PendingShare::Pqc { shared }) => shared,
            Some(PendingShare::Classic { ephemeral_secret }) => {
                self.provider
                    .kem_decapsulate(suite, &message.responder_share, &ephemeral_secret)
                    .await?
            }
            None => {
                return Err(SessionError::InvalidMessageFormat(
                    "responder selected a suite we sent no share for".to_string(),
                ))
            }
        };

        let km = key_schedule(&shared, &message.server_nonce, &client_nonce);
        let message_b_key = expand_key(&km, INFO_MESSAGE_B)?;
        let profile_bytes =
            hpke::open_with_key(message_b_key.as_ref(), &message.encrypted_payload, b"")?;
        let profile = NegotiatedProfile::decode(&profile_bytes)?;

        self.transcript.set_suite(message.selected_suite);
        self.transcript.set_peer_capabilities(profile.responder_capabilities.clone());

        // sigB covers the responder's transcript view after MessageA, with
        // suite, both capability blobs and policy already bound.
        let hash_after_a = self.transcript.hash_for_role(Role::Responder);
        let signing_input = message.signing_bytes(&hash_after_a);
        let valid = verify_identity_signature(
            self.provider.as_ref(),
            &message.identity,
            &signing_input,
            &message.signature,
        )
        .await?;
        if !valid {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "MessageB signature".to_string() });
            return Err(SessionError::AuthFailed("MessageB signature invalid".to_string()));
        }
        verify_se_signature(
            self.provider.as_ref(),
            &message.identity,
            b"SkyBridge-SE-B",
            &signing_input,
            &message.se_signature,
            self.policy.require_se_pop,
        )
        .await
        .inspect_err(|_| {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "MessageB SE signature".to_string() });
        })?;

        self.transcript.append(MessageType::HandshakeB, bytes)?;

        let finished_key = expand_key(&km, INFO_FINISHED)?;
        let own_mac =
            finished_mac(&finished_key, &self.transcript.hash(), DIRECTION_INITIATOR_TO_RESPONDER);
        let finished = Finished {
            version: PROTOCOL_VERSION,
            direction: DIRECTION_INITIATOR_TO_RESPONDER,
            mac: own_mac,
        };

        let assurance =
            if suite.is_pqc_group() { AssuranceLevel::PqcStrict } else { AssuranceLevel::LegacyClassic };
        let keys = SessionKeys {
            send_key: expand_key(&km, INFO_SEND_INITIATOR)?,
            receive_key: expand_key(&km, INFO_SEND_RESPONDER)?,
            negotiated_suite: suite,
            aead: profile.aead,
            assurance,
            handshake_id: compute_handshake_id(
                &client_nonce,
                &message.server_nonce,
                message.selected_suite,
            ),
            peer_fingerprint: TrustRecord::fingerprint_of(&message.identity.protocol_public_key),
            peer_capabilities: decode_capabilities(&profile.responder_capabilities)?,
            peer_identity: message.identity,
        };

        self.state = InitiatorState::AwaitingFinished { finished_key, keys };
        Ok(finished.encode())
    }

    /// Verifies the responder's Finished MAC. On success the handshake is
    /// `Established` and the session keys are released.
    pub fn handle_peer_finished(&mut self, bytes: &[u8]) -> Result<SessionKeys> {
        let (finished_key, keys) =
            match std::mem::replace(&mut self.state, InitiatorState::Failed) {
                InitiatorState::AwaitingFinished { finished_key, keys } => (finished_key, keys),
                _ => return Err(SessionError::InvalidState("Finished before MessageB".to_string())),
            };

        let finished = Finished::decode(bytes)?;
        if finished.direction != DIRECTION_RESPONDER_TO_INITIATOR {
            return Err(SessionError::InvalidMessageFormat(
                "wrong Finished direction".to_string(),
            ));
        }
        let expected = finished_mac(
            &finished_key,
            &self.transcript.hash_for_role(Role::Responder),
            DIRECTION_RESPONDER_TO_INITIATOR,
        );
        if !mac_matches(&expected, &finished.mac) {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "responder Finished MAC".to_string() });
            return Err(SessionError::AuthFailed("responder Finished MAC invalid".to_string()));
        }

        self.state = InitiatorState::Established;
        self.telemetry.emit(TelemetryEvent::HandshakeEstablished {
            suite: keys.negotiated_suite,
            assurance: keys.assurance,
        });
        info!(suite = %keys.negotiated_suite, "handshake established (initiator)");
        Ok(keys)
    }
}

enum ResponderState {
    Idle,
    SentB {
        finished_key: SecureBytes,
        keys: SessionKeys,
    },
    Established,
    Failed,
}

/// Everything the responder sends after a valid MessageA.
#[derive(Debug)]
pub struct ResponderFlight {
    /// Encoded MessageB.
    pub message_b: Vec<u8>,
    /// The responder's Finished message.
    pub finished: Vec<u8>,
}

/// Responder side of the handshake.
///
/// State machine: `Idle → (valid A) SentB → (peer Finished) Established`.
pub struct Responder {
    provider: Arc<dyn CryptoProvider>,
    policy: HandshakePolicy,
    identity: Arc<LocalIdentity>,
    replay: Arc<ReplayCache>,
    telemetry: Arc<dyn TelemetrySink>,
    transcript: TranscriptBuilder,
    state: ResponderState,
}

impl Responder {
    /// Creates a responder.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        policy: HandshakePolicy,
        identity: Arc<LocalIdentity>,
        replay: Arc<ReplayCache>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            provider,
            policy,
            identity,
            replay,
            telemetry,
            transcript: TranscriptBuilder::new(Role::Responder),
            state: ResponderState::Idle,
        }
    }

    /// Applies the suite-selection rule: the first offered suite that is
    /// known, supported, satisfies the minimum tier, is PQC-group if any
    /// party requires PQC, and is completable with the shares at hand.
    fn select_suite(&self, message: &MessageA, any_requires_pqc: bool) -> Option<Suite> {
        for wire_id in &message.supported_suites {
            let suite = Suite::from_wire_id(*wire_id);
            if !suite.is_known() || !self.provider.supported_suites().contains(&suite) {
                continue;
            }
            if !self.policy.suite_satisfies_minimum(suite) {
                continue;
            }
            if any_requires_pqc && !suite.is_pqc_group() {
                continue;
            }
            if message.share_for(*wire_id).is_none() {
                continue;
            }
            if suite.is_pqc_group() && !self.identity.kem_identities.contains_key(wire_id) {
                continue;
            }
            return Some(suite);
        }
        None
    }

    /// Processes MessageA: verifies the initiator, selects the suite,
    /// registers the handshake ID, and produces MessageB plus the
    /// responder's Finished.
    pub async fn handle_message_a(&mut self, bytes: &[u8]) -> Result<ResponderFlight> {
        if !matches!(self.state, ResponderState::Idle) {
            return Err(SessionError::InvalidState("MessageA already handled".to_string()));
        }
        self.state = ResponderState::Failed;
        self.policy.validate()?;

        let message = MessageA::decode(bytes)?;

        let signing_input = message.signing_bytes();
        let valid = verify_identity_signature(
            self.provider.as_ref(),
            &message.identity,
            &signing_input,
            &message.signature,
        )
        .await?;
        if !valid {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "MessageA signature".to_string() });
            return Err(SessionError::AuthFailed("MessageA signature invalid".to_string()));
        }
        verify_se_signature(
            self.provider.as_ref(),
            &message.identity,
            b"SkyBridge-SE-A",
            &signing_input,
            &message.se_signature,
            self.policy.require_se_pop,
        )
        .await
        .inspect_err(|_| {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "MessageA SE signature".to_string() });
        })?;

        let peer_policy = HandshakePolicy::from_deterministic_bytes(&message.policy)?;
        let any_requires_pqc = self.policy.require_pqc || peer_policy.require_pqc;

        let Some(suite) = self.select_suite(&message, any_requires_pqc) else {
            self.telemetry.emit(TelemetryEvent::SuiteNegotiationFailed);
            return Err(SessionError::SuiteNegotiationFailed);
        };
        let share = message
            .share_for(suite.wire_id())
            .ok_or_else(|| SessionError::InvalidState("selected suite lost its share".to_string()))?;

        let server_nonce = random_nonce().inspect_err(|_| {
            self.telemetry.emit(TelemetryEvent::RandomGenerationFailure);
        })?;

        let handshake_id =
            compute_handshake_id(&message.client_nonce, &server_nonce, suite.wire_id());
        if !self.replay.register_if_new(handshake_id) {
            self.telemetry.emit(TelemetryEvent::ReplayDetected);
            return Err(SessionError::Replay);
        }

        let (shared, responder_share) = if suite.is_pqc_group() {
            let kem_identity =
                self.identity.kem_identities.get(&suite.wire_id()).ok_or_else(|| {
                    SessionError::InvalidState("selected suite lost its KEM identity".to_string())
                })?;
            let shared =
                self.provider.kem_decapsulate(suite, &share.share, &kem_identity.secret).await?;
            (shared, Vec::new())
        } else {
            let ephemeral = self.provider.generate_keypair(suite, KeyUsage::KeyExchange).await?;
            let shared =
                self.provider.kem_decapsulate(suite, &share.share, &ephemeral.secret).await?;
            (shared, ephemeral.public)
        };

        let own_capabilities = encode_capabilities(&self.identity.capabilities);
        self.transcript.set_policy(message.policy.clone());
        self.transcript.set_local_capabilities(own_capabilities.clone());
        self.transcript.set_peer_capabilities(message.capabilities.clone());
        self.transcript.set_suite(suite.wire_id());
        self.transcript.append(MessageType::HandshakeA, bytes)?;

        let km = key_schedule(&shared, &server_nonce, &message.client_nonce);
        let message_b_key = expand_key(&km, INFO_MESSAGE_B)?;
        let profile =
            NegotiatedProfile { aead: AeadAlgorithm::Aes256Gcm, responder_capabilities: own_capabilities };
        let encrypted_payload =
            hpke::seal_with_key(message_b_key.as_ref(), suite, b"", &profile.encode())?;

        let mut message_b = MessageB {
            protocol_version: PROTOCOL_VERSION,
            selected_suite: suite.wire_id(),
            responder_share,
            server_nonce,
            encrypted_payload,
            identity: self.identity.identity_keys.clone(),
            signature: Vec::new(),
            se_signature: Vec::new(),
        };

        let hash_after_a = self.transcript.hash();
        let signing_input = message_b.signing_bytes(&hash_after_a);
        message_b.signature = self
            .provider
            .sign(self.identity.algorithm, &signing_input, &self.identity.signing_handle)
            .await?;
        if let Some(se_handle) = &self.identity.se_signing_handle {
            let preimage = se_preimage(b"SkyBridge-SE-B", &signing_input);
            message_b.se_signature =
                self.provider.sign(SignatureAlgorithm::P256Ecdsa, &preimage, se_handle).await?;
        }

        let encoded_b = message_b.encode();
        self.transcript.append(MessageType::HandshakeB, &encoded_b)?;

        let finished_key = expand_key(&km, INFO_FINISHED)?;
        let own_mac =
            finished_mac(&finished_key, &self.transcript.hash(), DIRECTION_RESPONDER_TO_INITIATOR);
        let finished = Finished {
            version: PROTOCOL_VERSION,
            direction: DIRECTION_RESPONDER_TO_INITIATOR,
            mac: own_mac,
        };

        let assurance =
            if suite.is_pqc_group() { AssuranceLevel::PqcStrict } else { AssuranceLevel::LegacyClassic };
        let keys = SessionKeys {
            send_key: expand_key(&km, INFO_SEND_RESPONDER)?,
            receive_key: expand_key(&km, INFO_SEND_INITIATOR)?,
            negotiated_suite: suite,
            aead: profile.aead,
            assurance,
            handshake_id,
            peer_fingerprint: TrustRecord::fingerprint_of(&message.identity.protocol_public_key),
            peer_capabilities: decode_capabilities(&message.capabilities)?,
            peer_identity: message.identity,
        };

        self.state = ResponderState::SentB { finished_key, keys };
        debug!(suite = %suite, "MessageB created");
        Ok(ResponderFlight { message_b: encoded_b, finished: finished.encode() })
    }

    /// Verifies the initiator's Finished MAC and releases the session keys.
    pub fn handle_peer_finished(&mut self, bytes: &[u8]) -> Result<SessionKeys> {
        let (finished_key, keys) =
            match std::mem::replace(&mut self.state, ResponderState::Failed) {
                ResponderState::SentB { finished_key, keys } => (finished_key, keys),
                _ => return Err(SessionError::InvalidState("Finished before MessageB".to_string())),
            };

        let finished = Finished::decode(bytes)?;
        if finished.direction != DIRECTION_INITIATOR_TO_RESPONDER {
            return Err(SessionError::InvalidMessageFormat(
                "wrong Finished direction".to_string(),
            ));
        }
        let expected = finished_mac(
            &finished_key,
            &self.transcript.hash_for_role(Role::Initiator),
            DIRECTION_INITIATOR_TO_RESPONDER,
        );
        if !mac_matches(&expected, &finished.mac) {
            self.telemetry
                .emit(TelemetryEvent::AuthFailed { reason: "initiator Finished MAC".to_string() });
            return Err(SessionError::AuthFailed("initiator Finished MAC invalid".to_string()));
        }

        self.state = ResponderState::Established;
        self.telemetry.emit(TelemetryEvent::HandshakeEstablished {
            suite: keys.negotiated_suite,
            assurance: keys.assurance,
        });
        info!(suite = %keys.negotiated_suite, "handshake established (responder)");
        Ok(keys)
    }
}
