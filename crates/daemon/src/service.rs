//! Node assembly and lifecycle
//!
//! Wires identity, directory, storage, swarm, router and ingress together,
//! owns every background task, and runs the ordered shutdown: drain the
//! listeners, stop the workers, sweep and close storage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum_server::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ghosttalk_core::{NodeInfo, NodeState};
use ghosttalk_crypto::SigningKeypair;
use ghosttalk_directory::{BootstrapBundle, Directory, HealthProber, NodeRegistration};
use ghosttalk_gateway::{
    cluster_router, dev_router, metrics_router, public_router, serve_cluster, serve_metrics,
    serve_public, AppState, MtlsFiles, RateLimitConfig, RateLimiter, TlsFiles,
};
use ghosttalk_onion::{ReplayCache, Router as OnionRouter};
use ghosttalk_settings::{Settings, StorageBackendKind};
use ghosttalk_storage::{Backend, MemoryBackend, SledBackend};
use ghosttalk_swarm::{peer_http_client, ReplicatorConfig, SwarmConfig, SwarmStore};

/// How long in-flight requests may finish after a shutdown signal.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);
/// Outbound peer calls share this timeout.
const PEER_TIMEOUT: Duration = Duration::from_secs(10);
/// Full-store expiry sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);

pub struct Node {
    settings: Settings,
    signing: SigningKeypair,
    state: Arc<AppState>,
    background: Vec<JoinHandle<()>>,
}

impl Node {
    /// Assemble a node from settings. No tasks are spawned yet.
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        settings.validate().context("invalid settings")?;

        let identity = ghosttalk_keystore::load_or_generate_identity(&settings.private_key_file)
            .context("loading node identity")?;

        let local = NodeInfo {
            public_key: identity.pubkey(),
            onion_key: identity.onion_pubkey(),
            address: settings.published_address().to_string(),
            region: None,
            last_seen: 0,
            state: NodeState::Active,
        };
        info!(
            node = %settings.node_id,
            identity = %hex::encode(identity.pubkey()),
            "Node identity ready"
        );

        let directory = Arc::new(Directory::new(identity.signing.clone(), local));

        let backend = match settings.storage.backend {
            StorageBackendKind::Memory => Backend::Memory(MemoryBackend::new()),
            StorageBackendKind::EmbeddedLsm => {
                Backend::Sled(SledBackend::open(&settings.storage.path).context("opening storage")?)
            }
        };

        let swarm_config = SwarmConfig {
            replica_count: settings.swarm.replica_count,
            max_ttl_secs: settings.swarm.ttl_days * 86_400,
            max_size_bytes: settings.storage.max_size_gb * 1024 * 1024 * 1024,
        };
        let peer_client = peer_http_client(PEER_TIMEOUT);
        let swarm = Arc::new(SwarmStore::with_replication(
            backend,
            swarm_config,
            Arc::clone(&directory),
            peer_client.clone(),
            ReplicatorConfig::default(),
        ));

        let replay = Arc::new(ReplayCache::new());
        let onion_router = Arc::new(OnionRouter::new(identity.onion.clone(), replay));

        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: settings.rate_limit.enabled,
            requests_per_second: settings.rate_limit.requests_per_second,
            burst: settings.rate_limit.burst,
        }));

        let state = Arc::new(AppState {
            onion_router,
            swarm,
            directory,
            rate_limiter,
            peer_client,
            peer_scheme: "https",
            started_at: Instant::now(),
        });

        Ok(Self {
            settings,
            signing: identity.signing,
            state,
            background: Vec::new(),
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run until a shutdown signal, then tear down in order.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.spawn_background();
        self.bootstrap_from_peers().await;

        let public_addr: SocketAddr = self
            .settings
            .listen_address
            .parse()
            .context("parsing listen_address")?;

        let mtls_enabled = self.settings.mtls.enabled;
        let public_app = if mtls_enabled {
            public_router(self.state())
        } else {
            // Without mTLS the cluster routes ride on the public listener
            dev_router(self.state())
        };

        let mut handles = Vec::new();
        let public_handle = Handle::new();
        handles.push(public_handle.clone());

        let tls = match (&self.settings.tls.cert_file, &self.settings.tls.key_file) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert_file: cert.clone(),
                key_file: key.clone(),
            }),
            _ => {
                warn!("TLS certificates not configured; public listener is plaintext");
                None
            }
        };

        let mut public_server = tokio::spawn(serve_public(
            public_addr,
            public_app,
            tls,
            public_handle.clone(),
        ));

        if mtls_enabled {
            let mtls = &self.settings.mtls;
            // Settings::validate already guaranteed the files are present
            let files = match (&mtls.ca_file, &mtls.cert_file, &mtls.key_file) {
                (Some(ca), Some(cert), Some(key)) => MtlsFiles {
                    ca_file: ca.clone(),
                    cert_file: cert.clone(),
                    key_file: key.clone(),
                },
                _ => anyhow::bail!("mtls.enabled requires ca_file, cert_file and key_file"),
            };
            let addr: SocketAddr = mtls
                .listen_address
                .parse()
                .context("parsing mtls.listen_address")?;
            let handle = Handle::new();
            handles.push(handle.clone());
            let app = cluster_router(self.state());
            tokio::spawn(async move {
                if let Err(err) = serve_cluster(addr, app, files, handle).await {
                    error!("Cluster listener failed: {}", err);
                }
            });
        }

        if let Some(metrics_addr) = &self.settings.metrics.listen_address {
            let addr: SocketAddr = metrics_addr
                .parse()
                .context("parsing metrics.listen_address")?;
            let handle = Handle::new();
            handles.push(handle.clone());
            let app = metrics_router(self.state());
            tokio::spawn(async move {
                if let Err(err) = serve_metrics(addr, app, handle).await {
                    error!("Metrics listener failed: {}", err);
                }
            });
        }

        info!("GhostTalk node running on {}", public_addr);

        tokio::select! {
            result = &mut public_server => {
                match result {
                    Ok(Ok(())) => info!("Public listener stopped"),
                    Ok(Err(err)) => error!("Public listener failed: {}", err),
                    Err(err) => error!("Public listener panicked: {}", err),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
            }
        }

        self.shutdown(handles).await
    }

    fn spawn_background(&mut self) {
        self.background
            .push(self.state.onion_router.replay_cache().spawn_sweeper());
        self.background
            .push(Arc::clone(&self.state.swarm).spawn_sweeper(SWEEP_INTERVAL));
        self.background
            .push(Arc::clone(&self.state.rate_limiter).spawn_sweeper());
        self.background
            .push(HealthProber::new(Arc::clone(&self.state.directory)).spawn());
    }

    /// Learn the network from the configured bootstrap peers and announce
    /// ourselves to them. Best-effort: a dead bootstrap node is not fatal.
    async fn bootstrap_from_peers(&self) {
        let local = self.state.directory.local_node().clone();
        for peer in &self.settings.bootstrap_nodes {
            if peer == &local.address {
                continue;
            }

            let url = format!("https://{peer}/v1/nodes/bootstrap");
            match self.state.peer_client.get(&url).send().await {
                Ok(response) => match response.json::<BootstrapBundle>().await {
                    // Integrity check; peer authenticity rests on the
                    // operator-supplied bootstrap list itself.
                    Ok(bundle) if bundle.verify(&bundle.signed_by) => {
                        info!(%peer, nodes = bundle.nodes.len(), "Merged bootstrap bundle");
                        self.state.directory.merge_nodes(bundle.nodes);
                    }
                    Ok(_) => warn!(%peer, "Bootstrap bundle failed verification"),
                    Err(err) => warn!(%peer, "Undecodable bootstrap bundle: {}", err),
                },
                Err(err) => warn!(%peer, "Bootstrap fetch failed: {}", err),
            }

            let registration = NodeRegistration::sign(local.clone(), &self.signing);
            let url = format!("https://{peer}/v1/nodes/register");
            if let Err(err) = self
                .state
                .peer_client
                .post(&url)
                .json(&registration)
                .send()
                .await
            {
                warn!(%peer, "Self-registration failed: {}", err);
            }
        }
    }

    async fn shutdown(self, handles: Vec<Handle>) -> anyhow::Result<()> {
        info!("Draining listeners");
        for handle in &handles {
            handle.graceful_shutdown(Some(DRAIN_DEADLINE));
        }
        // Give the drain a moment before tearing down the subsystems the
        // in-flight requests still use.
        tokio::time::sleep(Duration::from_millis(200)).await;

        for task in &self.background {
            task.abort();
        }
        self.state.swarm.shutdown_replication();

        match self.state.swarm.cleanup_expired() {
            Ok(removed) => info!("Final sweep removed {} expired messages", removed),
            Err(err) => warn!("Final sweep failed: {}", err),
        }
        self.state.swarm.close().context("closing storage")?;
        info!("Node stopped");
        Ok(())
    }
}
