//! Known-node registry
//!
//! Read-mostly shared state. All updates funnel through the write lock and
//! rebuild the ring before releasing it, so readers always observe a
//! coherent (registry, ring) pair.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ghosttalk_core::{hex_sig, unix_now, NodeInfo, NodeState, PublicKey, Signature};
use ghosttalk_crypto::{verify_signature, SigningKeypair};

use crate::bundle::BootstrapBundle;
use crate::ring::Ring;
use crate::{DirectoryError, Result};

/// A self-signed node record as submitted to `register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node: NodeInfo,
    #[serde(with = "hex_sig")]
    pub signature: Signature,
}

impl NodeRegistration {
    pub fn sign(node: NodeInfo, keypair: &SigningKeypair) -> Self {
        let signature = ghosttalk_crypto::sign_data(keypair, &node.signable_data());
        Self { node, signature }
    }
}

struct NodeEntry {
    info: NodeInfo,
    consecutive_failures: u8,
}

struct Inner {
    nodes: HashMap<PublicKey, NodeEntry>,
    ring: Ring,
}

impl Inner {
    fn rebuild_ring(&mut self) {
        self.ring = Ring::build(
            self.nodes
                .values()
                .filter(|entry| entry.info.state != NodeState::Down)
                .map(|entry| entry.info.address.clone()),
        );
    }
}

pub struct Directory {
    identity: SigningKeypair,
    local: NodeInfo,
    inner: RwLock<Inner>,
}

impl Directory {
    /// Create a directory seeded with the local node's own record.
    pub fn new(identity: SigningKeypair, mut local: NodeInfo) -> Self {
        local.state = NodeState::Active;
        local.last_seen = unix_now();

        let mut nodes = HashMap::new();
        nodes.insert(local.public_key, NodeEntry {
            info: local.clone(),
            consecutive_failures: 0,
        });

        let mut inner = Inner {
            nodes,
            ring: Ring::default(),
        };
        inner.rebuild_ring();

        Self {
            identity,
            local,
            inner: RwLock::new(inner),
        }
    }

    /// The local node's own published record.
    pub fn local_node(&self) -> &NodeInfo {
        &self.local
    }

    /// Admit a self-signed node record. Admission policy beyond signature
    /// validity is enforced out-of-band.
    pub fn register(&self, registration: NodeRegistration) -> Result<()> {
        let node = registration.node;
        if !verify_signature(
            &node.public_key,
            &node.signable_data(),
            &registration.signature,
        ) {
            warn!("Rejected registration with bad signature");
            return Err(DirectoryError::InvalidSignature);
        }

        info!(address = %node.address, "Registered node");
        let mut inner = self.inner.write();
        let mut info = node;
        info.state = NodeState::Active;
        info.last_seen = unix_now();
        inner.nodes.insert(info.public_key, NodeEntry {
            info,
            consecutive_failures: 0,
        });
        inner.rebuild_ring();
        Ok(())
    }

    /// Merge nodes learned from a peer's verified bootstrap bundle.
    /// Existing entries keep their health state.
    pub fn merge_nodes(&self, nodes: Vec<NodeInfo>) {
        let mut inner = self.inner.write();
        let mut added = 0;
        for node in nodes {
            if !inner.nodes.contains_key(&node.public_key) {
                inner.nodes.insert(node.public_key, NodeEntry {
                    info: node,
                    consecutive_failures: 0,
                });
                added += 1;
            }
        }
        if added > 0 {
            debug!("Merged {} new nodes from bootstrap", added);
            inner.rebuild_ring();
        }
    }

    /// The signed bundle served at `/v1/nodes/bootstrap`: every node not
    /// currently Down.
    pub fn bootstrap(&self) -> BootstrapBundle {
        let nodes: Vec<NodeInfo> = {
            let inner = self.inner.read();
            inner
                .nodes
                .values()
                .filter(|entry| entry.info.state != NodeState::Down)
                .map(|entry| entry.info.clone())
                .collect()
        };
        BootstrapBundle::sign(nodes, unix_now(), &self.identity)
    }

    /// The swarm holding `recipient_id`: first `k` ring nodes clockwise.
    pub fn swarm_for(&self, recipient_id: &str, k: usize) -> Vec<String> {
        self.inner.read().ring.select(recipient_id, k)
    }

    /// Record a health-probe outcome. Two consecutive failures evict the
    /// node from the ring; any success reinstates it.
    pub fn record_probe(&self, public_key: &PublicKey, healthy: bool) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.nodes.get_mut(public_key) else {
            return;
        };

        if healthy {
            let was_down = entry.info.state == NodeState::Down;
            entry.consecutive_failures = 0;
            entry.info.state = NodeState::Active;
            entry.info.last_seen = unix_now();
            if was_down {
                info!(address = %entry.info.address, "Node recovered, rejoining ring");
                inner.rebuild_ring();
            }
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            match entry.consecutive_failures {
                1 => {
                    entry.info.state = NodeState::Suspect;
                    debug!(address = %entry.info.address, "Node suspect");
                }
                _ => {
                    if entry.info.state != NodeState::Down {
                        entry.info.state = NodeState::Down;
                        warn!(address = %entry.info.address, "Node down, evicted from ring");
                        inner.rebuild_ring();
                    }
                }
            }
        }
    }

    /// All known nodes except the local one; the prober's worklist.
    pub fn peers(&self) -> Vec<NodeInfo> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|entry| entry.info.public_key != self.local.public_key)
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn ring_len(&self) -> usize {
        self.inner.read().ring.len()
    }
}
