//! SPAKE2+-style exchange over P-256 with true point arithmetic.
//!
//! The six-digit code is stretched with PBKDF2-HMAC-SHA-256 (100 000
//! iterations) into a password scalar `w`. The initiator sends
//! `pA = w·M + x·G`, the responder `pB = w·N + y·G`, with M and N the
//! RFC 9382 P-256 constants. Both sides derive the shared point
//! `Z = x·y·G`, then confirm and session keys via HKDF-SHA-256 salted
//! with `pA || pB`. Confirmation MACs are compared in constant time.
//!
//! A code stretched for one pairing is never reused: the initiator state
//! is consumed by `finish` and fresh randomness enters every exchange.

use crate::pake::PakeError;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::elliptic_curve::group::Group;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, NonZeroScalar, ProjectivePoint, Scalar, U256};
use rand::rngs::OsRng;
use sha2::Sha256;
use skybridge_crypto::SecureBytes;
use skybridge_wire::{Decoder, Encoder};
use std::num::NonZeroU32;
use subtle::ConstantTimeEq;

/// PBKDF2 iteration count for code stretching.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt prefix for code stretching.
const SALT_PREFIX: &[u8] = b"SkyBridge-SPAKE2+-v1";

/// HKDF info prefix for key derivation.
const KEYS_INFO: &[u8] = b"SPAKE2+ keys";

/// RFC 9382 point M for P-256 (SEC1 compressed).
const M_COMPRESSED: [u8; 33] = [
    0x02, 0x88, 0x6e, 0x2f, 0x97, 0xac, 0xe4, 0x6e, 0x55, 0xba, 0x9d, 0xd7, 0x24, 0x25, 0x79,
    0xf2, 0x99, 0x3b, 0x64, 0xe1, 0x6e, 0xf3, 0xdc, 0xab, 0x95, 0xaf, 0xd4, 0x97, 0x33, 0x3d,
    0x8f, 0xa1, 0x2f,
];

/// RFC 9382 point N for P-256 (SEC1 compressed).
const N_COMPRESSED: [u8; 33] = [
    0x03, 0xd8, 0xbb, 0xd6, 0xc6, 0x39, 0xc6, 0x29, 0x37, 0xb0, 0x4d, 0x99, 0x7f, 0x38, 0xc3,
    0x77, 0x07, 0x19, 0xc6, 0x29, 0xd7, 0x01, 0x4d, 0x49, 0xa2, 0x4b, 0x4f, 0x98, 0xba, 0xa1,
    0x29, 0x2b, 0x49,
];

fn fixed_point(compressed: &[u8; 33]) -> ProjectivePoint {
    let encoded = EncodedPoint::from_bytes(compressed).expect("fixed point encoding");
    Option::<ProjectivePoint>::from(ProjectivePoint::from_encoded_point(&encoded))
        .expect("fixed point on curve")
}

fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint, PakeError> {
    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(PakeError::InvalidPoint);
    }
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| PakeError::InvalidPoint)?;
    let point = Option::<ProjectivePoint>::from(ProjectivePoint::from_encoded_point(&encoded))
        .ok_or(PakeError::InvalidPoint)?;
    if bool::from(point.is_identity()) {
        return Err(PakeError::InvalidPoint);
    }
    Ok(point)
}

fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(false).as_bytes().to_vec()
}

/// Stretches a pairing code into the password scalar `w`.
///
/// Salt: `"SkyBridge-SPAKE2+-v1" || sort(localId, peerId).join("|")`, so
/// both sides derive the same scalar regardless of role.
pub fn stretch_code(code: &str, id_a: &str, id_b: &str) -> Scalar {
    let (first, second) = if id_a <= id_b { (id_a, id_b) } else { (id_b, id_a) };
    let mut salt = SALT_PREFIX.to_vec();
    salt.extend_from_slice(first.as_bytes());
    salt.push(b'|');
    salt.extend_from_slice(second.as_bytes());

    let mut okm = [0u8; 32];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERATIONS).expect("nonzero iterations"),
        &salt,
        code.as_bytes(),
        &mut okm,
    );
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(&okm))
}

fn random_nonce() -> Result<[u8; 32], PakeError> {
    let mut nonce = [0u8; 32];
    getrandom::getrandom(&mut nonce).map_err(|_| PakeError::RandomGenerationFailed)?;
    Ok(nonce)
}

/// Derived pairing keys.
#[derive(Debug)]
pub struct PakeKeys {
    /// Key for the confirmation MACs.
    pub confirm_key: SecureBytes,
    /// Authenticated session key, separate from the handshake driver's.
    pub session_key: SecureBytes,
}

fn derive_keys(
    shared: &ProjectivePoint,
    pa: &[u8],
    pb: &[u8],
    initiator_id: &str,
    responder_id: &str,
) -> Result<PakeKeys, PakeError> {
    if bool::from(shared.is_identity()) {
        return Err(PakeError::InvalidPoint);
    }
    let encoded = shared.to_affine().to_encoded_point(false);
    let ikm = encoded.x().ok_or(PakeError::InvalidPoint)?;

    let mut salt = Vec::with_capacity(pa.len() + pb.len());
    salt.extend_from_slice(pa);
    salt.extend_from_slice(pb);

    let mut info = KEYS_INFO.to_vec();
    info.extend_from_slice(initiator_id.as_bytes());
    info.extend_from_slice(responder_id.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), ikm.as_slice());
    let mut okm = [0u8; 64];
    hk.expand(&info, &mut okm)
        .map_err(|_| PakeError::InvalidMessage("key derivation failed".to_string()))?;

    Ok(PakeKeys {
        confirm_key: SecureBytes::from_slice(&okm[..32]),
        session_key: SecureBytes::from_slice(&okm[32..]),
    })
}

fn confirm_mac(
    confirm_key: &SecureBytes,
    direction: u8,
    pa: &[u8],
    pb: &[u8],
    nonce_a: &[u8; 32],
    nonce_b: &[u8; 32],
) -> [u8; 32] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(confirm_key.as_ref())
        .expect("HMAC accepts any key length");
    mac.update(&[direction]);
    mac.update(pa);
    mac.update(pb);
    mac.update(nonce_a);
    mac.update(nonce_b);
    mac.finalize().into_bytes().into()
}

/// First pairing message, initiator → responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakeMessageA {
    /// `pA = w·M + x·G`, uncompressed SEC1.
    pub pa: Vec<u8>,
    /// Initiator device ID.
    pub device_id: String,
    /// Initiator capability blob.
    pub capabilities: Vec<u8>,
    /// Fresh initiator nonce.
    pub nonce: [u8; 32],
}

impl PakeMessageA {
    /// Serializes the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_bytes(&self.pa);
        enc.put_string(&self.device_id);
        enc.put_bytes(&self.capabilities);
        enc.put_raw(&self.nonce);
        enc.into_bytes()
    }

    /// Parses the message.
    pub fn decode(buf: &[u8]) -> Result<Self, PakeError> {
        let mut dec = Decoder::new(buf);
        let parse = |e: skybridge_wire::WireError| PakeError::InvalidMessage(e.to_string());
        let pa = dec.bytes().map_err(parse)?.to_vec();
        let device_id = dec.string().map_err(parse)?;
        let capabilities = dec.bytes().map_err(parse)?.to_vec();
        let nonce: [u8; 32] =
            dec.raw(32).map_err(parse)?.try_into().expect("fixed-length read");
        dec.finish().map_err(parse)?;
        Ok(Self { pa, device_id, capabilities, nonce })
    }
}

/// Second pairing message, responder → initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakeMessageB {
    /// `pB = w·N + y·G`, uncompressed SEC1.
    pub pb: Vec<u8>,
    /// Responder confirmation MAC.
    pub confirm_mac: [u8; 32],
    /// Responder device ID.
    pub device_id: String,
    /// Negotiated profile blob.
    pub profile: Vec<u8>,
    /// Fresh responder nonce.
    pub nonce: [u8; 32],
}

impl PakeMessageB {
    /// Serializes the message.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put_bytes(&self.pb);
        enc.put_raw(&self.confirm_mac);
        enc.put_string(&self.device_id);
        enc.put_bytes(&self.profile);
        enc.put_raw(&self.nonce);
        enc.into_bytes()
    }

    /// Parses the message.
    pub fn decode(buf: &[u8]) -> Result<Self, PakeError> {
        let mut dec = Decoder::new(buf);
        let parse = |e: skybridge_wire::WireError| PakeError::InvalidMessage(e.to_string());
        let pb = dec.bytes().map_err(parse)?.to_vec();
        let confirm_mac: [u8; 32] =
            dec.raw(32).map_err(parse)?.try_into().expect("fixed-length read");
        let device_id = dec.string().map_err(parse)?;
        let profile = dec.bytes().map_err(parse)?.to_vec();
        let nonce: [u8; 32] =
            dec.raw(32).map_err(parse)?.try_into().expect("fixed-length read");
        dec.finish().map_err(parse)?;
        Ok(Self { pb, confirm_mac, device_id, profile, nonce })
    }
}

/// Final confirmation, initiator → responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakeConfirm {
    /// Initiator confirmation MAC.
    pub mac: [u8; 32],
}

impl PakeConfirm {
    /// Serializes the message.
    pub fn encode(&self) -> Vec<u8> {
        self.mac.to_vec()
    }

    /// Parses the message.
    pub fn decode(buf: &[u8]) -> Result<Self, PakeError> {
        let mac: [u8; 32] = buf
            .try_into()
            .map_err(|_| PakeError::InvalidMessage("confirm must be 32 bytes".to_string()))?;
        Ok(Self { mac })
    }
}

/// Initiator-side pairing state, consumed by [`PakeInitiator::finish`].
pub struct PakeInitiator {
    w: Scalar,
    x: NonZeroScalar,
    local_id: String,
    peer_id: String,
    message_a: PakeMessageA,
}

impl std::fmt::Debug for PakeInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakeInitiator")
            .field("w", &"<redacted>")
            .field("x", &"<redacted>")
            .field("local_id", &self.local_id)
            .field("peer_id", &self.peer_id)
            .field("message_a", &self.message_a)
            .finish()
    }
}

impl PakeInitiator {
    /// Stretches the code and produces the first pairing message.
    pub fn start(
        code: &str,
        local_id: &str,
        peer_id: &str,
        capabilities: Vec<u8>,
    ) -> Result<(Self, PakeMessageA), PakeError> {
        let w = stretch_code(code, local_id, peer_id);
        let x = NonZeroScalar::random(&mut OsRng);
        let m = fixed_point(&M_COMPRESSED);
        let pa = m * w + ProjectivePoint::GENERATOR * x.as_ref();

        let message = PakeMessageA {
            pa: encode_point(&pa),
            device_id: local_id.to_string(),
            capabilities,
            nonce: random_nonce()?,
        };
        let state = Self {
            w,
            x,
            local_id: local_id.to_string(),
            peer_id: peer_id.to_string(),
            message_a: message.clone(),
        };
        Ok((state, message))
    }

    /// Verifies the responder's confirmation and produces the final
    /// confirmation plus the derived keys. Consumes the exchange state so
    /// a stretched code cannot be reused.
    pub fn finish(self, message_b: &PakeMessageB) -> Result<(PakeConfirm, PakeKeys), PakeError> {
        let pb_point = decode_point(&message_b.pb)?;
        let n = fixed_point(&N_COMPRESSED);
        let shared = (pb_point - n * self.w) * self.x.as_ref();

        let keys = derive_keys(
            &shared,
            &self.message_a.pa,
            &message_b.pb,
            &self.local_id,
            &self.peer_id,
        )?;

        let expected_b = confirm_mac(
            &keys.confirm_key,
            0x02,
            &self.message_a.pa,
            &message_b.pb,
            &self.message_a.nonce,
            &message_b.nonce,
        );
        if !bool::from(expected_b.ct_eq(&message_b.confirm_mac)) {
            return Err(PakeError::MacVerificationFailed);
        }

        let mac_a = confirm_mac(
            &keys.confirm_key,
            0x01,
            &self.message_a.pa,
            &message_b.pb,
            &self.message_a.nonce,
            &message_b.nonce,
        );
        Ok((PakeConfirm { mac: mac_a }, keys))
    }
}

/// Responder-side pairing state.
pub struct PakeResponder {
    keys: PakeKeys,
    expected_confirm: [u8; 32],
}

impl PakeResponder {
    /// Processes the first pairing message and produces the second, with
    /// the responder's confirmation MAC.
    pub fn respond(
        code: &str,
        local_id: &str,
        message_a: &PakeMessageA,
        profile: Vec<u8>,
    ) -> Result<(Self, PakeMessageB), PakeError> {
        let pa_point = decode_point(&message_a.pa)?;
        let w = stretch_code(code, local_id, &message_a.device_id);
        let y = NonZeroScalar::random(&mut OsRng);
        let n = fixed_point(&N_COMPRESSED);
        let m = fixed_point(&M_COMPRESSED);

        let pb = n * w + ProjectivePoint::GENERATOR * y.as_ref();
        let pb_bytes = encode_point(&pb);
        let shared = (pa_point - m * w) * y.as_ref();

        let keys = derive_keys(&shared, &message_a.pa, &pb_bytes, &message_a.device_id, local_id)?;

        let nonce = random_nonce()?;
        let mac_b =
            confirm_mac(&keys.confirm_key, 0x02, &message_a.pa, &pb_bytes, &message_a.nonce, &nonce);
        let expected_confirm =
            confirm_mac(&keys.confirm_key, 0x01, &message_a.pa, &pb_bytes, &message_a.nonce, &nonce);

        let message = PakeMessageB {
            pb: pb_bytes,
            confirm_mac: mac_b,
            device_id: local_id.to_string(),
            profile,
            nonce,
        };
        Ok((Self { keys, expected_confirm }, message))
    }

    /// Verifies the initiator's final confirmation in constant time.
    pub fn verify_confirm(&self, confirm: &PakeConfirm) -> Result<(), PakeError> {
        if bool::from(self.expected_confirm.ct_eq(&confirm.mac)) {
            Ok(())
        } else {
            Err(PakeError::MacVerificationFailed)
        }
    }

    /// The derived keys. Only meaningful after a verified confirmation.
    pub fn keys(&self) -> &PakeKeys {
        &self.keys
    }
}
