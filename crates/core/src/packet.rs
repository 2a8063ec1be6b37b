//! Fixed-size onion packet format
//!
//! Every packet on the wire is exactly [`PACKET_LEN`] bytes. There is no
//! variable-length header and no framing; a relay that cannot parse a buffer
//! at these exact offsets drops it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{GhostTalkError, Result};

/// Total wire size of an onion packet.
pub const PACKET_LEN: usize = 1280;
/// The only accepted packet version.
pub const VERSION: u8 = 0x01;
/// Sender's one-time X25519 public key.
pub const EPHEMERAL_LEN: usize = 32;
/// HMAC-SHA256 over `ephemeral_pub || routing_blob`.
pub const MAC_LEN: usize = 32;
/// Layered routing ciphertext, [`MAX_HOPS`] slots of [`SLOT_LEN`] bytes.
pub const BLOB_LEN: usize = 615;
/// One hop's encrypted routing slot (AEAD tag included).
pub const SLOT_LEN: usize = 205;
/// ChaCha20-Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;
/// Decrypted slot contents: routing record plus padding.
pub const SLOT_PLAINTEXT_LEN: usize = SLOT_LEN - TAG_LEN;
/// Encoded routing record inside a decrypted slot.
pub const RECORD_LEN: usize = 61;
/// End-to-end ciphertext, opaque to the relay at every hop.
pub const PAYLOAD_LEN: usize = 600;
/// Maximum path length a packet's blob can describe.
pub const MAX_HOPS: usize = BLOB_LEN / SLOT_LEN;

const EPHEMERAL_OFF: usize = 1;
const MAC_OFF: usize = EPHEMERAL_OFF + EPHEMERAL_LEN;
const BLOB_OFF: usize = MAC_OFF + MAC_LEN;
const PAYLOAD_OFF: usize = BLOB_OFF + BLOB_LEN;

const ADDR_TYPE_TERMINAL: u8 = 0x00;
const ADDR_TYPE_V4: u8 = 0x04;
const ADDR_TYPE_V6: u8 = 0x06;

/// A parsed onion packet. Field order matches the wire layout.
#[derive(Clone)]
pub struct OnionPacket {
    pub ephemeral_pub: [u8; EPHEMERAL_LEN],
    pub hmac: [u8; MAC_LEN],
    pub routing_blob: [u8; BLOB_LEN],
    pub payload: [u8; PAYLOAD_LEN],
}

impl OnionPacket {
    /// Parse a wire buffer. Rejects anything that is not exactly
    /// [`PACKET_LEN`] bytes of version [`VERSION`].
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != PACKET_LEN {
            return Err(GhostTalkError::MalformedPacket(format!(
                "length {} != {}",
                buf.len(),
                PACKET_LEN
            )));
        }
        if buf[0] != VERSION {
            return Err(GhostTalkError::MalformedPacket(format!(
                "version 0x{:02x}",
                buf[0]
            )));
        }

        let mut ephemeral_pub = [0u8; EPHEMERAL_LEN];
        ephemeral_pub.copy_from_slice(&buf[EPHEMERAL_OFF..MAC_OFF]);
        let mut hmac = [0u8; MAC_LEN];
        hmac.copy_from_slice(&buf[MAC_OFF..BLOB_OFF]);
        let mut routing_blob = [0u8; BLOB_LEN];
        routing_blob.copy_from_slice(&buf[BLOB_OFF..PAYLOAD_OFF]);
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&buf[PAYLOAD_OFF..]);

        Ok(Self {
            ephemeral_pub,
            hmac,
            routing_blob,
            payload,
        })
    }

    /// Serialize back to the exact wire layout.
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = VERSION;
        buf[EPHEMERAL_OFF..MAC_OFF].copy_from_slice(&self.ephemeral_pub);
        buf[MAC_OFF..BLOB_OFF].copy_from_slice(&self.hmac);
        buf[BLOB_OFF..PAYLOAD_OFF].copy_from_slice(&self.routing_blob);
        buf[PAYLOAD_OFF..].copy_from_slice(&self.payload);
        buf
    }
}

/// One hop's routing record, recovered by decrypting the leading slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRecord {
    /// Next relay to forward to; `None` marks the terminal hop.
    pub next_hop: Option<SocketAddr>,
    /// Unix seconds after which the packet must be dropped.
    pub expiry: u64,
    /// Upper bound for the random forwarding delay.
    pub delay_ms: u16,
    /// MAC key the next hop will derive; used to seal the outbound packet.
    pub next_mac_key: [u8; 32],
}

impl RoutingRecord {
    /// Encode into the fixed [`RECORD_LEN`]-byte slot prefix.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        match self.next_hop {
            None => {
                out[0] = ADDR_TYPE_TERMINAL;
            }
            Some(SocketAddr::V4(sa)) => {
                out[0] = ADDR_TYPE_V4;
                // IPv4 is left-padded into the 16-byte address field
                out[13..17].copy_from_slice(&sa.ip().octets());
                out[17..19].copy_from_slice(&sa.port().to_be_bytes());
            }
            Some(SocketAddr::V6(sa)) => {
                out[0] = ADDR_TYPE_V6;
                out[1..17].copy_from_slice(&sa.ip().octets());
                out[17..19].copy_from_slice(&sa.port().to_be_bytes());
            }
        }
        out[19..27].copy_from_slice(&self.expiry.to_be_bytes());
        out[27..29].copy_from_slice(&self.delay_ms.to_be_bytes());
        out[29..61].copy_from_slice(&self.next_mac_key);
        out
    }

    /// Decode a record from decrypted slot bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_LEN {
            return Err(GhostTalkError::MalformedPacket(
                "routing record truncated".to_string(),
            ));
        }

        let port = u16::from_be_bytes([buf[17], buf[18]]);
        let next_hop = match buf[0] {
            ADDR_TYPE_TERMINAL => None,
            ADDR_TYPE_V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&buf[13..17]);
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            ADDR_TYPE_V6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            other => {
                return Err(GhostTalkError::MalformedPacket(format!(
                    "address type 0x{:02x}",
                    other
                )))
            }
        };

        let mut expiry_bytes = [0u8; 8];
        expiry_bytes.copy_from_slice(&buf[19..27]);
        let mut next_mac_key = [0u8; 32];
        next_mac_key.copy_from_slice(&buf[29..61]);

        Ok(Self {
            next_hop,
            expiry: u64::from_be_bytes(expiry_bytes),
            delay_ms: u16::from_be_bytes([buf[27], buf[28]]),
            next_mac_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> OnionPacket {
        OnionPacket {
            ephemeral_pub: [1u8; EPHEMERAL_LEN],
            hmac: [2u8; MAC_LEN],
            routing_blob: [3u8; BLOB_LEN],
            payload: [4u8; PAYLOAD_LEN],
        }
    }

    #[test]
    fn test_layout_constants_tile() {
        assert_eq!(1 + EPHEMERAL_LEN + MAC_LEN + BLOB_LEN + PAYLOAD_LEN, PACKET_LEN);
        assert_eq!(MAX_HOPS * SLOT_LEN, BLOB_LEN);
        assert!(RECORD_LEN <= SLOT_PLAINTEXT_LEN);
    }

    #[test]
    fn test_packet_roundtrip() {
        let packet = sample_packet();
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), PACKET_LEN);
        assert_eq!(bytes[0], VERSION);

        let parsed = OnionPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.ephemeral_pub, packet.ephemeral_pub);
        assert_eq!(parsed.hmac, packet.hmac);
        assert_eq!(parsed.routing_blob[..], packet.routing_blob[..]);
        assert_eq!(parsed.payload[..], packet.payload[..]);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let bytes = vec![VERSION; PACKET_LEN - 1];
        assert!(OnionPacket::parse(&bytes).is_err());

        let bytes = vec![VERSION; PACKET_LEN + 1];
        assert!(OnionPacket::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let mut bytes = sample_packet().to_bytes();
        bytes[0] = 0x02;
        assert!(OnionPacket::parse(&bytes).is_err());
    }

    #[test]
    fn test_record_roundtrip_v4() {
        let record = RoutingRecord {
            next_hop: Some("10.1.2.3:4433".parse().unwrap()),
            expiry: 1_900_000_000,
            delay_ms: 250,
            next_mac_key: [9u8; 32],
        };
        let encoded = record.encode();
        assert_eq!(RoutingRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn test_record_roundtrip_v6() {
        let record = RoutingRecord {
            next_hop: Some("[2001:db8::7]:443".parse().unwrap()),
            expiry: 42,
            delay_ms: 0,
            next_mac_key: [0u8; 32],
        };
        let encoded = record.encode();
        assert_eq!(RoutingRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn test_record_terminal() {
        let record = RoutingRecord {
            next_hop: None,
            expiry: 7,
            delay_ms: 100,
            next_mac_key: [5u8; 32],
        };
        let encoded = record.encode();
        assert_eq!(encoded[0], 0x00);
        let decoded = RoutingRecord::decode(&encoded).unwrap();
        assert!(decoded.next_hop.is_none());
        assert_eq!(decoded.expiry, 7);
    }

    #[test]
    fn test_record_rejects_unknown_addr_type() {
        let mut encoded = RoutingRecord {
            next_hop: None,
            expiry: 0,
            delay_ms: 0,
            next_mac_key: [0u8; 32],
        }
        .encode();
        encoded[0] = 0x05;
        assert!(RoutingRecord::decode(&encoded).is_err());
    }

    #[test]
    fn test_record_rejects_truncated() {
        assert!(RoutingRecord::decode(&[0u8; RECORD_LEN - 1]).is_err());
    }
}
