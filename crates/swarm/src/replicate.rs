//! Replica fan-out
//!
//! Fire-and-forget delivery of stores and deletes to the recipient's swarm
//! peers over the shared inter-node HTTP client. A bounded queue feeds a
//! fixed worker pool; when the queue is full the job is dropped and
//! counted. The originating request never waits on any of this.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use ghosttalk_core::MailboxMessage;

use crate::store::SwarmStats;

#[derive(Debug, Clone)]
pub enum ReplicationJob {
    Store(Box<MailboxMessage>),
    Delete { recipient_id: String, id: String },
}

#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    /// `https` in production; tests point at plain-HTTP peers.
    pub scheme: &'static str,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1_024,
            request_timeout: Duration::from_secs(10),
            scheme: "https",
        }
    }
}

/// Shared inter-node HTTP client. Peer certificates are self-issued, so
/// chain validation is off; peer identity comes from the signed directory.
pub fn peer_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(10)
        .build()
        .expect("reqwest client construction")
}

pub struct Replicator {
    queue: mpsc::Sender<(String, ReplicationJob)>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<SwarmStats>,
}

impl Replicator {
    pub fn new(client: reqwest::Client, config: ReplicatorConfig, stats: Arc<SwarmStats>) -> Self {
        let (tx, rx) = mpsc::channel::<(String, ReplicationJob)>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers)
            .map(|_| {
                let rx = Arc::clone(&rx);
                let client = client.clone();
                let stats = Arc::clone(&stats);
                let scheme = config.scheme;
                let timeout = config.request_timeout;
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some((peer, job)) = job else {
                            break;
                        };
                        deliver(&client, scheme, timeout, &peer, job, &stats).await;
                    }
                })
            })
            .collect();

        Self {
            queue: tx,
            workers,
            stats,
        }
    }

    /// Queue one job for each peer. Never blocks; overflow is dropped and
    /// counted.
    pub fn enqueue(&self, peers: Vec<String>, job: ReplicationJob) {
        for peer in peers {
            if self.queue.try_send((peer, job.clone())).is_err() {
                self.stats
                    .replication_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop the worker pool. In-flight requests are cancelled.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn deliver(
    client: &reqwest::Client,
    scheme: &str,
    timeout: Duration,
    peer: &str,
    job: ReplicationJob,
    stats: &SwarmStats,
) {
    let result = match &job {
        ReplicationJob::Store(message) => {
            let url = format!("{scheme}://{peer}/v1/swarm/replicate");
            client.post(url).timeout(timeout).json(&**message).send().await
        }
        ReplicationJob::Delete { recipient_id, id } => {
            let url = format!("{scheme}://{peer}/v1/swarm/messages/{recipient_id}/{id}");
            client.delete(url).timeout(timeout).send().await
        }
    };

    match result {
        // 404 covers a replica that has already forgotten the record
        Ok(response)
            if response.status().is_success()
                || response.status() == reqwest::StatusCode::NOT_FOUND =>
        {
            stats.replicated.fetch_add(1, Ordering::Relaxed);
            debug!(%peer, "Replication delivered");
        }
        Ok(response) => {
            stats.replication_failed.fetch_add(1, Ordering::Relaxed);
            warn!(%peer, status = %response.status(), "Replication rejected");
        }
        Err(err) => {
            stats.replication_failed.fetch_add(1, Ordering::Relaxed);
            warn!(%peer, "Replication failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghosttalk_core::unix_now;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> ReplicatorConfig {
        ReplicatorConfig {
            workers: 2,
            queue_capacity: 16,
            request_timeout: Duration::from_secs(2),
            scheme: "http",
        }
    }

    fn test_message() -> MailboxMessage {
        MailboxMessage {
            id: "m1".to_string(),
            recipient_id: "R1".to_string(),
            ciphertext: vec![1, 2, 3],
            message_kind: 0,
            created_at: unix_now(),
            expires_at: unix_now() + 3_600,
            replica_target: 3,
        }
    }

    async fn wait_for(stats: &SwarmStats, f: impl Fn(&SwarmStats) -> bool) {
        for _ in 0..100 {
            if f(stats) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("replication outcome never observed");
    }

    #[tokio::test]
    async fn test_store_fans_out_to_peer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/swarm/replicate"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let stats = Arc::new(SwarmStats::default());
        let replicator = Replicator::new(
            peer_http_client(Duration::from_secs(2)),
            test_config(),
            Arc::clone(&stats),
        );

        replicator.enqueue(
            vec![server.address().to_string()],
            ReplicationJob::Store(Box::new(test_message())),
        );
        wait_for(&stats, |s| s.replicated.load(Ordering::Relaxed) == 1).await;
    }

    #[tokio::test]
    async fn test_delete_404_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/swarm/messages/R1/m1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let stats = Arc::new(SwarmStats::default());
        let replicator = Replicator::new(
            peer_http_client(Duration::from_secs(2)),
            test_config(),
            Arc::clone(&stats),
        );

        replicator.enqueue(
            vec![server.address().to_string()],
            ReplicationJob::Delete {
                recipient_id: "R1".to_string(),
                id: "m1".to_string(),
            },
        );
        wait_for(&stats, |s| s.replicated.load(Ordering::Relaxed) == 1).await;
    }

    #[tokio::test]
    async fn test_peer_error_counted_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/swarm/replicate"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let stats = Arc::new(SwarmStats::default());
        let replicator = Replicator::new(
            peer_http_client(Duration::from_secs(2)),
            test_config(),
            Arc::clone(&stats),
        );

        replicator.enqueue(
            vec![server.address().to_string()],
            ReplicationJob::Store(Box::new(test_message())),
        );
        wait_for(&stats, |s| s.replication_failed.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.replicated.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_and_counts() {
        let stats = Arc::new(SwarmStats::default());
        // No workers: the single queue slot fills and stays full
        let config = ReplicatorConfig {
            workers: 0,
            queue_capacity: 1,
            ..test_config()
        };
        let replicator = Replicator::new(
            peer_http_client(Duration::from_secs(2)),
            config,
            Arc::clone(&stats),
        );

        let job = ReplicationJob::Store(Box::new(test_message()));
        replicator.enqueue(vec!["127.0.0.1:1".to_string()], job.clone());
        replicator.enqueue(vec!["127.0.0.1:2".to_string()], job);
        assert_eq!(stats.replication_dropped.load(Ordering::Relaxed), 1);
    }
}
