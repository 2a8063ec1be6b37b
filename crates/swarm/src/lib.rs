//! GhostTalk Swarm Store
//!
//! Mailbox semantics over the ordered storage backend: TTL-bounded store,
//! retrieval by recipient, idempotent delete, expiry sweeping, and
//! best-effort replica fan-out to the recipient's swarm peers.

mod replicate;
mod store;

pub use replicate::{peer_http_client, ReplicationJob, Replicator, ReplicatorConfig};
pub use store::{SwarmConfig, SwarmStats, SwarmStatsSnapshot, SwarmStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Storage error: {0}")]
    Storage(#[from] ghosttalk_storage::StorageError),

    #[error("Invalid message: {0}")]
    Message(#[from] ghosttalk_core::GhostTalkError),

    #[error("Corrupt stored value: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;
