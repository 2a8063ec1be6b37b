//! Peer health probing
//!
//! Lightweight `GET /health` against every known peer on an interval.
//! Outcomes feed [`Directory::record_probe`], which handles the
//! active → suspect → down transitions and ring eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::registry::Directory;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

pub struct HealthProber {
    directory: Arc<Directory>,
    client: reqwest::Client,
    interval: Duration,
}

impl HealthProber {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self::with_interval(directory, DEFAULT_PROBE_INTERVAL)
    }

    pub fn with_interval(directory: Arc<Directory>, interval: Duration) -> Self {
        // Peer certificates are self-issued; node identity is established
        // by the directory's Ed25519 signatures, not the TLS chain.
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client construction");
        Self {
            directory,
            client,
            interval,
        }
    }

    /// Probe every peer once.
    pub async fn probe_all(&self) {
        let peers = self.directory.peers();
        let probes = peers.into_iter().map(|peer| {
            let client = self.client.clone();
            let directory = Arc::clone(&self.directory);
            async move {
                let url = format!("https://{}/health", peer.address);
                let healthy = match client.get(&url).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(err) => {
                        trace!(address = %peer.address, "Probe failed: {}", err);
                        false
                    }
                };
                directory.record_probe(&peer.public_key, healthy);
            }
        });
        futures::future::join_all(probes).await;
    }

    /// Run the probe loop until aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so freshly merged
            // bootstrap nodes are not probed before they finish starting.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("Probing {} peers", self.directory.peers().len());
                self.probe_all().await;
            }
        })
    }
}
