//! Mailbox store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ghosttalk_core::{unix_now, MailboxMessage};
use ghosttalk_directory::Directory;
use ghosttalk_storage::{message_key, recipient_prefix, Backend, StorageError};

use crate::replicate::{ReplicationJob, Replicator};
use crate::Result;

/// Floor for a message lifetime; a zero or past expiry still lives this long.
pub const MIN_TTL_SECS: u64 = 1;
/// Default retention: 14 days.
pub const DEFAULT_TTL_DAYS: u64 = 14;

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Swarm size k: the message lives on the originator plus k−1 peers.
    pub replica_count: u8,
    /// Hard upper bound on message lifetime, seconds.
    pub max_ttl_secs: u64,
    /// Coarse storage ceiling in bytes; 0 disables the guard.
    pub max_size_bytes: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            replica_count: 3,
            max_ttl_secs: DEFAULT_TTL_DAYS * 86_400,
            max_size_bytes: 0,
        }
    }
}

/// Operator-facing counters.
#[derive(Default)]
pub struct SwarmStats {
    pub stored: AtomicU64,
    pub retrieved: AtomicU64,
    pub deleted: AtomicU64,
    pub expired: AtomicU64,
    pub replicated: AtomicU64,
    pub replication_failed: AtomicU64,
    pub replication_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwarmStatsSnapshot {
    pub stored: u64,
    pub retrieved: u64,
    pub deleted: u64,
    pub expired: u64,
    pub replicated: u64,
    pub replication_failed: u64,
    pub replication_dropped: u64,
}

impl SwarmStats {
    pub fn snapshot(&self) -> SwarmStatsSnapshot {
        SwarmStatsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            retrieved: self.retrieved.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            replicated: self.replicated.load(Ordering::Relaxed),
            replication_failed: self.replication_failed.load(Ordering::Relaxed),
            replication_dropped: self.replication_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The mailbox. Exclusively owns the storage backend; closing the store
/// closes the backend.
pub struct SwarmStore {
    backend: Backend,
    config: SwarmConfig,
    directory: Arc<Directory>,
    replicator: Option<Replicator>,
    stats: Arc<SwarmStats>,
}

impl SwarmStore {
    pub fn new(
        backend: Backend,
        config: SwarmConfig,
        directory: Arc<Directory>,
        replicator: Option<Replicator>,
    ) -> Self {
        Self {
            backend,
            config,
            directory,
            replicator,
            stats: Arc::new(SwarmStats::default()),
        }
    }

    /// Construct a store whose replicator shares its stats counters.
    pub fn with_replication(
        backend: Backend,
        config: SwarmConfig,
        directory: Arc<Directory>,
        client: reqwest::Client,
        replicator_config: crate::ReplicatorConfig,
    ) -> Self {
        let stats = Arc::new(SwarmStats::default());
        let replicator = Replicator::new(client, replicator_config, Arc::clone(&stats));
        Self {
            backend,
            config,
            directory,
            replicator: Some(replicator),
            stats,
        }
    }

    /// Stop the replication worker pool; queued jobs are discarded.
    pub fn shutdown_replication(&self) {
        if let Some(replicator) = &self.replicator {
            replicator.shutdown();
        }
    }

    pub fn stats(&self) -> Arc<SwarmStats> {
        Arc::clone(&self.stats)
    }

    /// Accept a message from a client. The local write is the commit
    /// point; replication to the recipient's swarm peers happens off the
    /// critical path.
    pub fn store(&self, message: MailboxMessage) -> Result<()> {
        let message = self.persist(message)?;
        self.stats.stored.fetch_add(1, Ordering::Relaxed);

        if let Some(replicator) = &self.replicator {
            let peers = self.replica_peers(&message.recipient_id, message.replica_target);
            if !peers.is_empty() {
                replicator.enqueue(peers, ReplicationJob::Store(Box::new(message)));
            }
        }
        Ok(())
    }

    /// Accept a replica pushed by a peer: stored locally, never fanned out
    /// again.
    pub fn store_replica(&self, message: MailboxMessage) -> Result<()> {
        self.persist(message)?;
        self.stats.stored.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn persist(&self, mut message: MailboxMessage) -> Result<MailboxMessage> {
        let now = unix_now();
        if message.created_at == 0 {
            message.created_at = now;
        }
        // Clamp lifetime to [now+min, now+max]
        let floor = now + MIN_TTL_SECS;
        let ceiling = now + self.config.max_ttl_secs;
        message.expires_at = message.expires_at.clamp(floor, ceiling);
        if message.replica_target == 0 {
            message.replica_target = self.config.replica_count;
        }
        message.validate()?;

        if self.config.max_size_bytes > 0 {
            let used = self.backend.size_bytes();
            if used >= self.config.max_size_bytes {
                return Err(StorageError::Full {
                    used,
                    limit: self.config.max_size_bytes,
                }
                .into());
            }
        }

        let key = message_key(&message.recipient_id, &message.id);
        let value = serde_json::to_vec(&message)?;
        self.backend.put(&key, &value)?;
        debug!(id = %message.id, "Stored mailbox message");
        Ok(message)
    }

    /// All live messages for `recipient_id`, oldest key first. Expired
    /// entries found along the way are deleted.
    pub fn retrieve(&self, recipient_id: &str) -> Result<Vec<MailboxMessage>> {
        let now = unix_now();
        let mut messages = Vec::new();
        for (key, value) in self.backend.scan_prefix(&recipient_prefix(recipient_id))? {
            let message: MailboxMessage = match serde_json::from_slice(&value) {
                Ok(m) => m,
                Err(err) => {
                    // A corrupt record is unrecoverable; drop it rather
                    // than poison every future retrieval.
                    warn!(%key, "Removing undecodable mailbox record: {}", err);
                    self.backend.delete(&key)?;
                    continue;
                }
            };
            if message.is_expired(now) {
                self.backend.delete(&key)?;
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
            } else {
                messages.push(message);
            }
        }
        self.stats
            .retrieved
            .fetch_add(messages.len() as u64, Ordering::Relaxed);
        Ok(messages)
    }

    /// Delete one message locally and schedule deletion at the replicas.
    /// Idempotent: deleting an unknown id is not an error.
    pub fn delete(&self, recipient_id: &str, id: &str) -> Result<bool> {
        let existed = self.backend.delete(&message_key(recipient_id, id))?;
        if !existed {
            return Ok(false);
        }
        self.stats.deleted.fetch_add(1, Ordering::Relaxed);
        if let Some(replicator) = &self.replicator {
            let peers = self.replica_peers(recipient_id, self.config.replica_count);
            if !peers.is_empty() {
                replicator.enqueue(
                    peers,
                    ReplicationJob::Delete {
                        recipient_id: recipient_id.to_string(),
                        id: id.to_string(),
                    },
                );
            }
        }
        Ok(true)
    }

    /// Delete pushed by a peer: local only.
    pub fn delete_replica(&self, recipient_id: &str, id: &str) -> Result<bool> {
        let existed = self.backend.delete(&message_key(recipient_id, id))?;
        if existed {
            self.stats.deleted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(existed)
    }

    /// Full-store sweep; runs hourly and once at shutdown.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = unix_now();
        let mut removed = 0;
        for (key, value) in self.backend.scan_prefix("messages/")? {
            let expired = match serde_json::from_slice::<MailboxMessage>(&value) {
                Ok(message) => message.is_expired(now),
                Err(_) => true,
            };
            if expired {
                self.backend.delete(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
            info!("Expiry sweep removed {} messages", removed);
        }
        Ok(removed)
    }

    /// Swarm peers for a recipient, excluding this node.
    fn replica_peers(&self, recipient_id: &str, k: u8) -> Vec<String> {
        let local = &self.directory.local_node().address;
        self.directory
            .swarm_for(recipient_id, k as usize)
            .into_iter()
            .filter(|address| address != local)
            .collect()
    }

    /// Run the periodic expiry sweeper until aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.cleanup_expired() {
                    warn!("Expiry sweep failed: {}", err);
                }
            }
        })
    }

    /// Flush and release the backend.
    pub fn close(&self) -> Result<()> {
        self.backend.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghosttalk_core::NodeState;
    use ghosttalk_crypto::SigningKeypair;
    use ghosttalk_storage::MemoryBackend;

    fn test_directory() -> Arc<Directory> {
        let keypair = SigningKeypair::generate();
        let local = ghosttalk_core::NodeInfo {
            public_key: keypair.public_key_bytes(),
            onion_key: [0u8; 32],
            address: "127.0.0.1:8443".to_string(),
            region: None,
            last_seen: 0,
            state: NodeState::Active,
        };
        Arc::new(Directory::new(keypair, local))
    }

    fn test_store() -> SwarmStore {
        SwarmStore::new(
            Backend::Memory(MemoryBackend::new()),
            SwarmConfig::default(),
            test_directory(),
            None,
        )
    }

    fn message(id: &str, recipient: &str, ttl: u64) -> MailboxMessage {
        let now = unix_now();
        MailboxMessage {
            id: id.to_string(),
            recipient_id: recipient.to_string(),
            ciphertext: vec![0u8; 16],
            message_kind: 0,
            created_at: now,
            expires_at: now + ttl,
            replica_target: 0,
        }
    }

    #[test]
    fn test_store_then_retrieve() {
        let store = test_store();
        store.store(message("m1", "R1", 3_600)).unwrap();

        let got = store.retrieve("R1").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "m1");
        assert_eq!(got[0].ciphertext, vec![0u8; 16]);
    }

    #[test]
    fn test_retrieve_unknown_recipient_is_empty() {
        let store = test_store();
        assert!(store.retrieve("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_delete_then_retrieve_empty() {
        let store = test_store();
        store.store(message("m1", "R1", 3_600)).unwrap();

        assert!(store.delete("R1", "m1").unwrap());
        assert!(store.retrieve("R1").unwrap().is_empty());

        // Second delete is idempotent
        assert!(!store.delete("R1", "m1").unwrap());
    }

    #[test]
    fn test_recipients_are_isolated() {
        let store = test_store();
        store.store(message("m1", "R1", 3_600)).unwrap();
        store.store(message("m2", "R2", 3_600)).unwrap();

        assert_eq!(store.retrieve("R1").unwrap().len(), 1);
        assert_eq!(store.retrieve("R2").unwrap().len(), 1);
    }

    #[test]
    fn test_ttl_clamped_to_maximum() {
        let store = test_store();
        let msg = message("m1", "R1", 365 * 86_400);
        store.store(msg).unwrap();

        let got = store.retrieve("R1").unwrap();
        let lifetime = got[0].expires_at - unix_now();
        assert!(lifetime <= SwarmConfig::default().max_ttl_secs);
    }

    #[test]
    fn test_ttl_clamped_to_minimum() {
        let store = test_store();
        // expires_at in the past is lifted to now + MIN_TTL_SECS
        let mut msg = message("m1", "R1", 3_600);
        msg.expires_at = 1;
        store.store(msg).unwrap();

        // Read the record straight off the backend; it may expire within
        // the same wall-clock second
        let raw = store.backend.get(&message_key("R1", "m1")).unwrap().unwrap();
        let stored: MailboxMessage = serde_json::from_slice(&raw).unwrap();
        assert!(stored.expires_at > stored.created_at);
        assert!(stored.expires_at >= unix_now().saturating_sub(1) + MIN_TTL_SECS);
    }

    #[test]
    fn test_expired_message_filtered_and_swept() {
        let store = test_store();
        // Bypass store() clamping by writing the record directly
        let mut msg = message("m1", "R1", 3_600);
        msg.expires_at = unix_now() - 10;
        let key = message_key(&msg.recipient_id, &msg.id);
        store
            .backend
            .put(&key, &serde_json::to_vec(&msg).unwrap())
            .unwrap();

        assert!(store.retrieve("R1").unwrap().is_empty());
        assert_eq!(store.stats.expired.load(Ordering::Relaxed), 1);
        // Lazily removed from the backend too
        assert!(store.backend.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_expired_counts() {
        let store = test_store();
        let now = unix_now();
        for i in 0..3 {
            let mut msg = message(&format!("m{i}"), "R1", 3_600);
            msg.expires_at = now - 1;
            let key = message_key(&msg.recipient_id, &msg.id);
            store
                .backend
                .put(&key, &serde_json::to_vec(&msg).unwrap())
                .unwrap();
        }
        store.store(message("keep", "R1", 3_600)).unwrap();

        assert_eq!(store.cleanup_expired().unwrap(), 3);
        assert_eq!(store.retrieve("R1").unwrap().len(), 1);
    }

    #[test]
    fn test_store_rejects_bad_ids() {
        let store = test_store();
        let mut msg = message("a/b", "R1", 3_600);
        msg.replica_target = 1;
        assert!(store.store(msg).is_err());
    }

    #[test]
    fn test_size_guard() {
        let mut config = SwarmConfig::default();
        config.max_size_bytes = 1;
        let store = SwarmStore::new(
            Backend::Memory(MemoryBackend::new()),
            config,
            test_directory(),
            None,
        );
        store.store(message("m1", "R1", 3_600)).unwrap();
        assert!(matches!(
            store.store(message("m2", "R1", 3_600)),
            Err(crate::SwarmError::Storage(StorageError::Full { .. }))
        ));
    }

    #[test]
    fn test_corrupt_record_removed_on_retrieve() {
        let store = test_store();
        store
            .backend
            .put("messages/R1/bad", b"not json")
            .unwrap();
        assert!(store.retrieve("R1").unwrap().is_empty());
        assert!(store.backend.get("messages/R1/bad").unwrap().is_none());
    }
}
