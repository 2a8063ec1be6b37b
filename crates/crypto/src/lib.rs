//! GhostTalk node cryptography
//!
//! X25519 ECDH with per-hop key blinding, Ed25519 signing, the
//! HKDF-SHA256 hop-key schedule and ChaCha20-Poly1305 sealing used by the
//! onion router. All MAC and tag comparisons go through constant-time
//! primitives.

mod encrypt;
mod kdf;
mod keys;
mod sign;

pub use encrypt::{aead_open, aead_seal, CryptoError, AEAD_NONCE_LEN};
pub use kdf::{
    blind_public_key, blob_filler, ct_eq, derive_hop_keys, hmac_sha256, random_scalar_bytes,
    scalar_mul_point, scalar_mul_scalar, scalar_to_public, HopKeys, HKDF_SALT,
};
pub use keys::{EncryptionKeypair, NodeIdentity, SigningKeypair};
pub use sign::{sign_data, verify_signature};
