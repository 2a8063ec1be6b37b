//! Per-client-IP token buckets
//!
//! Buckets are allocated lazily in a concurrent map keyed by resolved
//! client IP; a periodic sweeper reaps buckets that have sat idle. The
//! check itself is lock-free apart from the per-key shard inside the map.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Buckets untouched this long are reaped.
const IDLE_REAP_AFTER: Duration = Duration::from_secs(300);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100,
            burst: 200,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<IpAddr, Bucket>,
    pub total_requests: AtomicU64,
    pub limited_requests: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            total_requests: AtomicU64::new(0),
            limited_requests: AtomicU64::new(0),
        }
    }

    /// Take one token for `ip`. Returns `false` when the request must be
    /// answered with 429.
    pub fn check(&self, ip: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket {
            tokens: self.config.burst as f64,
            last_seen: now,
        });

        let elapsed = now.duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.requests_per_second as f64)
            .min(self.config.burst as f64);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            self.limited_requests.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Drop buckets that have been idle long enough to be full again.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) < IDLE_REAP_AFTER);
        let reaped = before - self.buckets.len();
        if reaped > 0 {
            debug!("Reaped {} idle rate-limit buckets", reaped);
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

/// Resolve the client IP: `X-Forwarded-For`, then `X-Real-IP`, then the
/// peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse() {
                return ip;
            }
        }
    }
    peer.map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
