//! Directory records for known service nodes

use serde::{Deserialize, Serialize};

use crate::types::{hex_key, PublicKey};

/// Health state tracked by the directory prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Answering health probes; part of the ring.
    #[default]
    Active,
    /// One failed probe; still in the ring.
    Suspect,
    /// Two consecutive failed probes; evicted from the ring.
    Down,
}

/// A known service node as published in the bootstrap bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Ed25519 identity key; the node's identifier in the directory.
    #[serde(with = "hex_key")]
    pub public_key: PublicKey,
    /// X25519 key published for onion-packet ECDH.
    #[serde(with = "hex_key")]
    pub onion_key: PublicKey,
    /// Reachable host:port for HTTPS ingress.
    pub address: String,
    /// Operator-declared region label.
    #[serde(default)]
    pub region: Option<String>,
    /// Unix seconds of the last successful contact.
    #[serde(default)]
    pub last_seen: u64,
    /// Current health state.
    #[serde(default)]
    pub state: NodeState,
}

impl NodeInfo {
    /// Bytes covered by the node's registration signature.
    ///
    /// `last_seen` and `state` are directory-local bookkeeping and are
    /// excluded so that re-registration does not invalidate old signatures.
    pub fn signable_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(64 + self.address.len() + 16);
        data.extend_from_slice(&self.public_key);
        data.extend_from_slice(&self.onion_key);
        data.extend_from_slice(self.address.as_bytes());
        if let Some(region) = &self.region {
            data.extend_from_slice(region.as_bytes());
        }
        data
    }
}
