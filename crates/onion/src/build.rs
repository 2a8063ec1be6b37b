//! Sender-side packet construction
//!
//! Builds the 1280-byte onion packet for a chosen path. Lives in the node
//! crate because cooperating nodes and the test harness both need to
//! originate packets; end-user clients carry an equivalent implementation.
//!
//! The sender walks the path accumulating blinding scalars: hop i+1 sees
//! the ephemeral key `b_i · eph_i`, so the sender derives hop i+1's shared
//! secret from `node_pub · (x · b_1 ··· b_i)`. Each hop's slot carries the
//! next hop's MAC key so relays can seal the packet they actually forward.

use std::net::SocketAddr;

use rand::rngs::OsRng;
use rand::RngCore;

use ghosttalk_core::{
    GhostTalkError, OnionPacket, Result, RoutingRecord, BLOB_LEN, MAX_HOPS, PAYLOAD_LEN,
    RECORD_LEN, SLOT_LEN, SLOT_PLAINTEXT_LEN, VERSION,
};
use ghosttalk_crypto::{
    aead_seal, derive_hop_keys, random_scalar_bytes, scalar_mul_point, scalar_mul_scalar,
    scalar_to_public, HopKeys,
};

/// One relay on the sender's chosen path.
#[derive(Debug, Clone)]
pub struct PathHop {
    /// Where the previous hop forwards to (ignored for the first hop, which
    /// the sender contacts directly).
    pub address: SocketAddr,
    /// The relay's published X25519 onion key.
    pub onion_key: [u8; 32],
    /// Upper bound for this hop's forwarding delay.
    pub delay_ms: u16,
}

/// Build a full onion packet for `path`, terminal at the last hop.
///
/// `payload` is zero-padded to [`PAYLOAD_LEN`]; `expiry` is Unix seconds
/// applied to every hop.
pub fn build_packet(path: &[PathHop], payload: &[u8], expiry: u64) -> Result<Vec<u8>> {
    if path.is_empty() || path.len() > MAX_HOPS {
        return Err(GhostTalkError::MalformedPacket(format!(
            "path length {} out of range 1..={}",
            path.len(),
            MAX_HOPS
        )));
    }
    if payload.len() > PAYLOAD_LEN {
        return Err(GhostTalkError::MalformedPacket(format!(
            "payload {} bytes exceeds {}",
            payload.len(),
            PAYLOAD_LEN
        )));
    }

    // Walk the path once, accumulating the blinding product.
    let mut ephemerals: Vec<[u8; 32]> = Vec::with_capacity(path.len());
    let mut hop_keys: Vec<HopKeys> = Vec::with_capacity(path.len());
    let mut accum = random_scalar_bytes();
    for hop in path {
        ephemerals.push(scalar_to_public(&accum));
        let shared = scalar_mul_point(&accum, &hop.onion_key);
        let keys = derive_hop_keys(&shared);
        accum = scalar_mul_scalar(&accum, &keys.blinding);
        hop_keys.push(keys);
    }

    // Seal one routing slot per hop under that hop's enc key.
    let mut routing_blob = [0u8; BLOB_LEN];
    for (i, hop) in path.iter().enumerate() {
        let record = RoutingRecord {
            next_hop: path.get(i + 1).map(|next| next.address),
            expiry,
            delay_ms: hop.delay_ms,
            next_mac_key: hop_keys
                .get(i + 1)
                .map(|keys| keys.mac_key)
                .unwrap_or([0u8; 32]),
        };

        let mut plaintext = [0u8; SLOT_PLAINTEXT_LEN];
        plaintext[..RECORD_LEN].copy_from_slice(&record.encode());

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&ephemerals[i][..12]);
        let mut aad = [0u8; 33];
        aad[0] = VERSION;
        aad[1..].copy_from_slice(&ephemerals[i]);

        let slot = aead_seal(&hop_keys[i].enc_key, &nonce, &aad, &plaintext)
            .map_err(|e| GhostTalkError::SerializationError(e.to_string()))?;
        routing_blob[i * SLOT_LEN..(i + 1) * SLOT_LEN].copy_from_slice(&slot);
    }
    // Unused slots are random; relays shift them out before anyone decrypts.
    OsRng.fill_bytes(&mut routing_blob[path.len() * SLOT_LEN..]);

    let mut padded_payload = [0u8; PAYLOAD_LEN];
    padded_payload[..payload.len()].copy_from_slice(payload);

    let hmac = ghosttalk_crypto::hmac_sha256(
        &hop_keys[0].mac_key,
        &[&ephemerals[0], &routing_blob],
    );

    let packet = OnionPacket {
        ephemeral_pub: ephemerals[0],
        hmac,
        routing_blob,
        payload: padded_payload,
    };
    Ok(packet.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghosttalk_core::PACKET_LEN;
    use ghosttalk_crypto::EncryptionKeypair;

    fn hop(port: u16) -> PathHop {
        PathHop {
            address: format!("127.0.0.1:{port}").parse().unwrap(),
            onion_key: EncryptionKeypair::generate().public_key_bytes(),
            delay_ms: 0,
        }
    }

    #[test]
    fn test_packet_is_exactly_wire_size() {
        let packet = build_packet(&[hop(9000)], b"hello", 10_000).unwrap();
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(packet[0], VERSION);
    }

    #[test]
    fn test_empty_path_rejected() {
        assert!(build_packet(&[], b"x", 10_000).is_err());
    }

    #[test]
    fn test_overlong_path_rejected() {
        let path: Vec<PathHop> = (0..MAX_HOPS as u16 + 1).map(|i| hop(9100 + i)).collect();
        assert!(build_packet(&path, b"x", 10_000).is_err());
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let payload = vec![0u8; PAYLOAD_LEN + 1];
        assert!(build_packet(&[hop(9200)], &payload, 10_000).is_err());
    }

    #[test]
    fn test_max_size_payload_accepted() {
        let payload = vec![7u8; PAYLOAD_LEN];
        assert!(build_packet(&[hop(9201)], &payload, 10_000).is_ok());
    }

    #[test]
    fn test_packets_not_correlatable_across_builds() {
        let path = [hop(9300)];
        let a = build_packet(&path, b"same", 10_000).unwrap();
        let b = build_packet(&path, b"same", 10_000).unwrap();
        // Fresh ephemeral per packet
        assert_ne!(a[1..33], b[1..33]);
        assert_ne!(a[65..680], b[65..680]);
    }
}
