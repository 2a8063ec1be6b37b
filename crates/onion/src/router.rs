//! Per-hop packet processing

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::trace;

use ghosttalk_core::{
    unix_now, OnionPacket, RoutingRecord, BLOB_LEN, PACKET_LEN, RECORD_LEN, SLOT_LEN, VERSION,
};
use ghosttalk_crypto::{
    aead_open, blind_public_key, blob_filler, ct_eq, derive_hop_keys, hmac_sha256,
    EncryptionKeypair,
};

use crate::replay::{ReplayCache, ReplayTag};

/// Replay entries never outlive this, whatever the packet claims.
const REPLAY_EXPIRY_CAP_SECS: u64 = 7_200;

/// Outcome of processing one packet.
///
/// `Drop` carries no reason: a caller must not be able to distinguish a bad
/// MAC from a replay from an expired packet. Reasons exist only as
/// aggregate counters in [`RouterStats`].
pub enum RoutingDecision {
    /// Relay `packet` to `address` after sleeping `delay`.
    Forward {
        address: SocketAddr,
        packet: Vec<u8>,
        delay: Duration,
    },
    /// This node is the terminal hop; hand the payload to the swarm store.
    Deliver { payload: Vec<u8> },
    /// Invalid packet; no observable side effect.
    Drop,
}

/// Aggregate counters, operator-facing only.
#[derive(Default)]
pub struct RouterStats {
    pub forwarded: AtomicU64,
    pub delivered: AtomicU64,
    pub drops_total: AtomicU64,
    pub drops_malformed: AtomicU64,
    pub drops_bad_mac: AtomicU64,
    pub drops_replay: AtomicU64,
    pub drops_expired: AtomicU64,
    pub drops_undecryptable: AtomicU64,
}

enum DropReason {
    Malformed,
    BadMac,
    Replay,
    Expired,
    Undecryptable,
}

impl RouterStats {
    fn record_drop(&self, reason: DropReason) {
        self.drops_total.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            DropReason::Malformed => &self.drops_malformed,
            DropReason::BadMac => &self.drops_bad_mac,
            DropReason::Replay => &self.drops_replay,
            DropReason::Expired => &self.drops_expired,
            DropReason::Undecryptable => &self.drops_undecryptable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Stateless per-packet onion processor; only the replay cache is mutated.
pub struct Router {
    onion_keys: EncryptionKeypair,
    replay: Arc<ReplayCache>,
    stats: Arc<RouterStats>,
}

impl Router {
    pub fn new(onion_keys: EncryptionKeypair, replay: Arc<ReplayCache>) -> Self {
        Self {
            onion_keys,
            replay,
            stats: Arc::new(RouterStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RouterStats> {
        Arc::clone(&self.stats)
    }

    pub fn replay_cache(&self) -> Arc<ReplayCache> {
        Arc::clone(&self.replay)
    }

    /// Process one wire buffer against the current clock.
    pub fn process_packet(&self, buf: &[u8]) -> RoutingDecision {
        self.process_packet_at(buf, unix_now())
    }

    /// Process one wire buffer at an explicit clock; the deterministic core
    /// of [`Router::process_packet`].
    pub fn process_packet_at(&self, buf: &[u8], now: u64) -> RoutingDecision {
        // 1. Exact size and version, before touching any state.
        let packet = match OnionPacket::parse(buf) {
            Ok(p) => p,
            Err(_) => return self.drop(DropReason::Malformed),
        };

        // 2-3. ECDH against our onion key, then the hop-key schedule.
        let shared_secret = self.onion_keys.diffie_hellman(&packet.ephemeral_pub);
        let keys = derive_hop_keys(&shared_secret);

        // 4. Authenticate ephemeral key and routing blob.
        let expected = hmac_sha256(&keys.mac_key, &[&packet.ephemeral_pub, &packet.routing_blob]);
        if !ct_eq(&expected, &packet.hmac) {
            return self.drop(DropReason::BadMac);
        }

        // 6. Decrypt the leading slot. Nonce and aad are bound to the
        // ephemeral key, so a transplanted slot fails authentication.
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&packet.ephemeral_pub[..12]);
        let mut aad = [0u8; 33];
        aad[0] = VERSION;
        aad[1..].copy_from_slice(&packet.ephemeral_pub);

        let slot = match aead_open(&keys.enc_key, &nonce, &aad, &packet.routing_blob[..SLOT_LEN]) {
            Ok(plain) => plain,
            Err(_) => return self.drop(DropReason::Undecryptable),
        };
        let record = match RoutingRecord::decode(&slot[..RECORD_LEN.min(slot.len())]) {
            Ok(r) => r,
            Err(_) => return self.drop(DropReason::Undecryptable),
        };

        // 7. Declared expiry gates everything downstream.
        if record.expiry <= now {
            return self.drop(DropReason::Expired);
        }

        // 5. Replay gate, keyed by the verified MAC. Inserted only once the
        // packet is known valid so that garbage cannot populate the cache.
        let mut tag: ReplayTag = [0u8; 16];
        tag.copy_from_slice(&expected[..16]);
        let capped_expiry = record.expiry.min(now + REPLAY_EXPIRY_CAP_SECS);
        if !self.replay.check_and_insert(tag, capped_expiry, now) {
            return self.drop(DropReason::Replay);
        }

        // 8. Terminal hop: the payload goes to the mailbox, undecrypted.
        let Some(next_hop) = record.next_hop else {
            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            trace!("Packet delivered to local swarm store");
            return RoutingDecision::Deliver {
                payload: packet.payload.to_vec(),
            };
        };

        // 9. Rebuild the outbound packet: shift the blob one slot left,
        // pad with filler every hop can't tell from ciphertext, re-blind
        // the ephemeral key and seal with the carried-forward MAC key.
        let mut blob_out = [0u8; BLOB_LEN];
        blob_out[..BLOB_LEN - SLOT_LEN].copy_from_slice(&packet.routing_blob[SLOT_LEN..]);
        blob_filler(&keys.enc_key, &mut blob_out[BLOB_LEN - SLOT_LEN..]);

        let ephemeral_out = blind_public_key(&packet.ephemeral_pub, &keys.blinding);
        let hmac_out = hmac_sha256(&record.next_mac_key, &[&ephemeral_out, &blob_out]);

        let out = OnionPacket {
            ephemeral_pub: ephemeral_out,
            hmac: hmac_out,
            routing_blob: blob_out,
            payload: packet.payload,
        };

        let delay_ms = if record.delay_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=u64::from(record.delay_ms))
        };

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        trace!("Packet forwarded");
        RoutingDecision::Forward {
            address: next_hop,
            packet: out.to_bytes().to_vec(),
            delay: Duration::from_millis(delay_ms),
        }
    }

    fn drop(&self, reason: DropReason) -> RoutingDecision {
        self.stats.record_drop(reason);
        RoutingDecision::Drop
    }
}

// The forwarded packet must stay exactly PACKET_LEN; guarded here because
// everything above manipulates fixed arrays.
const _: () = assert!(PACKET_LEN == 1280);
