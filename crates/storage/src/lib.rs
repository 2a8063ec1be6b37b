//! GhostTalk Storage Backend
//!
//! Ordered key-value storage underneath the swarm store. Two backends:
//! an in-memory map for tests and small deployments, and an embedded
//! sled database for production. The mailbox only ever needs five
//! operations: put, get, delete, lexically-ordered prefix scan, close.

mod memory;
mod sled_backend;

pub use memory::MemoryBackend;
pub use sled_backend::SledBackend;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Invalid key encoding")]
    InvalidKey,

    #[error("Store is full: {used} of {limit} bytes")]
    Full { used: u64, limit: u64 },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage key for one mailbox message.
///
/// The `messages/<recipient>/<id>` shape is load-bearing: retrieval is a
/// single ordered scan of `messages/<recipient>/`.
pub fn message_key(recipient_id: &str, id: &str) -> String {
    format!("messages/{}/{}", recipient_id, id)
}

/// Scan prefix covering every message addressed to one recipient.
pub fn recipient_prefix(recipient_id: &str) -> String {
    format!("messages/{}/", recipient_id)
}

/// The configured storage backend, selected once at startup.
///
/// Enum dispatch keeps the hot path free of trait objects.
pub enum Backend {
    Memory(MemoryBackend),
    Sled(SledBackend),
}

impl Backend {
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        match self {
            Backend::Memory(b) => b.put(key, value),
            Backend::Sled(b) => b.put(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Backend::Memory(b) => b.get(key),
            Backend::Sled(b) => b.get(key),
        }
    }

    /// Delete a key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        match self {
            Backend::Memory(b) => b.delete(key),
            Backend::Sled(b) => b.delete(key),
        }
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, in
    /// ascending lexical key order.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        match self {
            Backend::Memory(b) => b.scan_prefix(prefix),
            Backend::Sled(b) => b.scan_prefix(prefix),
        }
    }

    /// Approximate bytes held, for the coarse size guard.
    pub fn size_bytes(&self) -> u64 {
        match self {
            Backend::Memory(b) => b.size_bytes(),
            Backend::Sled(b) => b.size_bytes(),
        }
    }

    /// Flush buffered writes and release the backend. Memory drops its
    /// map; sled flushes to disk.
    pub fn close(&self) -> Result<()> {
        match self {
            Backend::Memory(_) => Ok(()),
            Backend::Sled(b) => b.close(),
        }
    }
}
