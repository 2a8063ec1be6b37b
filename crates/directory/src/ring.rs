//! Consistent-hash ring over node addresses
//!
//! Nodes sit on a 64-bit ring at `u64(SHA-256(address)[..8])`. A key's
//! swarm is the first k distinct nodes clockwise from the key's own hash.
//! Pure data structure: rebuilt atomically by the directory writer,
//! lookups never mutate.

use sha2::{Digest, Sha256};

/// First 8 bytes of SHA-256, big-endian.
fn ring_hash(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone, Default)]
pub struct Ring {
    /// Sorted by position; one point per node address.
    points: Vec<(u64, String)>,
}

impl Ring {
    pub fn build<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut points: Vec<(u64, String)> = addresses
            .into_iter()
            .map(|addr| {
                let addr = addr.into();
                (ring_hash(addr.as_bytes()), addr)
            })
            .collect();
        points.sort();
        points.dedup_by(|a, b| a.1 == b.1);
        Self { points }
    }

    /// The first `k` distinct node addresses clockwise from `hash(key)`.
    /// Returns fewer than `k` when the ring is smaller than `k`.
    pub fn select(&self, key: &str, k: usize) -> Vec<String> {
        if self.points.is_empty() || k == 0 {
            return Vec::new();
        }

        let key_hash = ring_hash(key.as_bytes());
        let start = self
            .points
            .partition_point(|(position, _)| *position < key_hash);

        let mut selected: Vec<String> = Vec::with_capacity(k);
        for i in 0..self.points.len() {
            let (_, addr) = &self.points[(start + i) % self.points.len()];
            if !selected.iter().any(|existing| existing == addr) {
                selected.push(addr.clone());
                if selected.len() == k {
                    break;
                }
            }
        }
        selected
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
