use serde::{Deserialize, Serializer};
use serde::de::{Deserializer, Error as _};

/// 32-byte public key (Ed25519 identity or X25519 onion key)
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature
pub type Signature = [u8; 64];

/// Serde helper: `[u8; 32]` as a lowercase hex string in JSON.
pub mod hex_key {
    use super::*;

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw: String = Deserialize::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 hex-encoded bytes"))
    }
}

/// Serde helper: `[u8; 64]` as a lowercase hex string in JSON.
pub mod hex_sig {
    use super::*;

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(sig))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let raw: String = Deserialize::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 64 hex-encoded bytes"))
    }
}

/// Serde helper: `Vec<u8>` as standard base64 in JSON (message ciphertext).
pub mod base64_bytes {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw: String = Deserialize::deserialize(d)?;
        STANDARD.decode(&raw).map_err(D::Error::custom)
    }
}
