//! Replay cache for per-hop MAC tags
//!
//! Bounded LRU sharded across mutexes so concurrent router calls rarely
//! contend on the same lock. Entries carry the packet's declared expiry;
//! a 1 Hz sweeper evicts entries once their packet can no longer be
//! replayed anyway. Under capacity pressure LRU eviction may readmit a
//! replay, which is bounded by the packet expiry.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tag prefix stored per packet; 16 bytes of the hop HMAC.
pub type ReplayTag = [u8; 16];

const SHARDS: usize = 16;
/// Total entries across all shards.
pub const DEFAULT_CAPACITY: usize = 100_000;

pub struct ReplayCache {
    shards: Vec<Mutex<LruCache<ReplayTag, u64>>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let per_shard = (capacity / SHARDS).max(1);
        let shards = (0..SHARDS)
            .map(|_| {
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(per_shard).expect("per-shard capacity is nonzero"),
                ))
            })
            .collect();
        Self { shards }
    }

    fn shard(&self, tag: &ReplayTag) -> &Mutex<LruCache<ReplayTag, u64>> {
        &self.shards[tag[0] as usize % SHARDS]
    }

    /// Atomically record a tag. Returns `true` if the tag was fresh (the
    /// packet may be processed) and `false` if it is a replay that has not
    /// yet expired.
    pub fn check_and_insert(&self, tag: ReplayTag, expiry: u64, now: u64) -> bool {
        let mut shard = self.shard(&tag).lock();
        if let Some(existing) = shard.get(&tag) {
            if *existing > now {
                return false;
            }
        }
        shard.put(tag, expiry);
        true
    }

    /// Whether a tag is currently held (unexpired). Test hook.
    pub fn contains(&self, tag: &ReplayTag, now: u64) -> bool {
        let mut shard = self.shard(tag).lock();
        matches!(shard.get(tag), Some(expiry) if *expiry > now)
    }

    /// Evict every entry whose packet expiry has passed. Returns the count.
    pub fn sweep(&self, now: u64) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let expired: Vec<ReplayTag> = shard
                .iter()
                .filter(|(_, expiry)| **expiry <= now)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in expired {
                shard.pop(&tag);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the 1 Hz expiry sweeper until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let now = ghosttalk_core::unix_now();
                let evicted = self.sweep(now);
                if evicted > 0 {
                    debug!("Replay cache evicted {} expired tags", evicted);
                }
            }
        })
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
