//! Signed bootstrap bundle

use serde::{Deserialize, Serialize};

use ghosttalk_core::{hex_key, hex_sig, NodeInfo, PublicKey, Signature};
use ghosttalk_crypto::{sign_data, verify_signature, SigningKeypair};

/// The full active node set, timestamped and signed by the serving node's
/// identity key. Clients validate against a pinned public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapBundle {
    pub nodes: Vec<NodeInfo>,
    pub timestamp: u64,
    #[serde(with = "hex_key")]
    pub signed_by: PublicKey,
    #[serde(with = "hex_sig")]
    pub signature: Signature,
}

/// The signed portion; field order fixes the byte encoding.
#[derive(Serialize)]
struct SignablePart<'a> {
    nodes: &'a [NodeInfo],
    timestamp: u64,
}

fn signable_bytes(nodes: &[NodeInfo], timestamp: u64) -> Vec<u8> {
    serde_json::to_vec(&SignablePart { nodes, timestamp })
        .expect("bundle serialization is infallible")
}

impl BootstrapBundle {
    pub fn sign(nodes: Vec<NodeInfo>, timestamp: u64, keypair: &SigningKeypair) -> Self {
        let signature = sign_data(keypair, &signable_bytes(&nodes, timestamp));
        Self {
            nodes,
            timestamp,
            signed_by: keypair.public_key_bytes(),
            signature,
        }
    }

    /// Verify the bundle against a pinned directory key.
    pub fn verify(&self, pinned_key: &PublicKey) -> bool {
        self.signed_by == *pinned_key
            && verify_signature(
                pinned_key,
                &signable_bytes(&self.nodes, self.timestamp),
                &self.signature,
            )
    }
}
