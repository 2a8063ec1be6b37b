//! Hop-key schedule and per-hop key blinding
//!
//! Each relay derives `(enc_key, mac_key, blinding)` from its X25519 shared
//! secret with the packet's ephemeral key. The blinding scalar is applied to
//! the ephemeral key before forwarding so that two hops of the same packet
//! cannot be correlated by the ephemeral value.

use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation salt for the hop-key HKDF.
pub const HKDF_SALT: &[u8] = b"GhostTalk-v1";

const HOP_KEYS_INFO: &[u8] = b"hop-keys";
const FILLER_INFO: &[u8] = b"blob-filler";

/// Per-hop key material derived from one ECDH shared secret.
pub struct HopKeys {
    /// ChaCha20-Poly1305 key for the leading routing slot.
    pub enc_key: [u8; 32],
    /// HMAC-SHA256 key authenticating `ephemeral_pub || routing_blob`.
    pub mac_key: [u8; 32],
    /// Scalar applied to the ephemeral key before forwarding.
    pub blinding: [u8; 32],
}

/// Derive the hop keys: HKDF-SHA256(ss), 96 bytes split three ways.
pub fn derive_hop_keys(shared_secret: &[u8; 32]) -> HopKeys {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
    let mut okm = [0u8; 96];
    // 96 bytes is well under the HKDF-SHA256 output bound; expand cannot fail
    hk.expand(HOP_KEYS_INFO, &mut okm)
        .expect("hkdf output length");

    let mut keys = HopKeys {
        enc_key: [0u8; 32],
        mac_key: [0u8; 32],
        blinding: [0u8; 32],
    };
    keys.enc_key.copy_from_slice(&okm[0..32]);
    keys.mac_key.copy_from_slice(&okm[32..64]);
    keys.blinding.copy_from_slice(&okm[64..96]);
    keys
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8; 32], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Constant-time equality for MAC tags.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Deterministic filler appended to the routing blob after the shift.
///
/// Derived from the hop's enc_key so the packet builder can predict the
/// exact blob every downstream relay will see.
pub fn blob_filler(enc_key: &[u8; 32], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::new(None, enc_key);
    hk.expand(FILLER_INFO, out).expect("hkdf output length");
}

/// Apply a blinding scalar to an X25519 public key (Sphinx convention).
pub fn blind_public_key(public: &[u8; 32], blinding: &[u8; 32]) -> [u8; 32] {
    scalar_mul_point(blinding, public)
}

/// Scalar × point on the Montgomery curve, both as raw bytes.
pub fn scalar_mul_point(scalar: &[u8; 32], point: &[u8; 32]) -> [u8; 32] {
    let scalar = Scalar::from_bytes_mod_order(*scalar);
    (MontgomeryPoint(*point) * scalar).to_bytes()
}

/// Scalar product mod ℓ; used by packet builders to accumulate blindings.
pub fn scalar_mul_scalar(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    (Scalar::from_bytes_mod_order(*a) * Scalar::from_bytes_mod_order(*b)).to_bytes()
}

/// The Montgomery basepoint raised to `scalar` (unclamped).
pub fn scalar_to_public(scalar: &[u8; 32]) -> [u8; 32] {
    MontgomeryPoint::mul_base(&Scalar::from_bytes_mod_order(*scalar)).to_bytes()
}

/// A uniform scalar mod ℓ as raw bytes.
pub fn random_scalar_bytes() -> [u8; 32] {
    let mut wide = [0u8; 64];
    OsRng.fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide).to_bytes()
}
