//! Request routing and handlers
//!
//! Two routers share one state: the public surface served to clients over
//! TLS 1.3, and the cluster surface (replication) reserved for mTLS peers.
//! Handlers translate between HTTP and the subsystems and map every error
//! per the taxonomy: client mistakes 4xx, storage trouble 5xx, onion
//! processing failures a single undifferentiated 400.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use ghosttalk_core::{
    base64_bytes, unix_now, GhostTalkError, MailboxMessage, PACKET_LEN, VERSION,
};
use ghosttalk_directory::{BootstrapBundle, Directory, NodeRegistration};
use ghosttalk_onion::{Router as OnionRouter, RoutingDecision};
use ghosttalk_storage::StorageError;
use ghosttalk_swarm::{SwarmError, SwarmStore};

use crate::rate_limit::{client_ip, RateLimiter};

/// Onion responses never return faster than this, so the routing decision
/// is not inferable from latency.
const ONION_MIN_LATENCY: Duration = Duration::from_millis(50);

/// Request body cap; covers the largest ciphertext with JSON overhead.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Default message lifetime when the sender names no TTL.
const DEFAULT_TTL_SECS: u64 = 14 * 86_400;

pub struct AppState {
    pub onion_router: Arc<OnionRouter>,
    pub swarm: Arc<SwarmStore>,
    pub directory: Arc<Directory>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Shared client for forwarding packets to the next hop.
    pub peer_client: reqwest::Client,
    /// `https` in production; tests run plain-HTTP peers.
    pub peer_scheme: &'static str,
    pub started_at: Instant,
}

/// Client-facing body of `POST /v1/swarm/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    /// Sender-chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub destination_id: String,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(default)]
    pub message_kind: u8,
    #[serde(default)]
    pub created_at: Option<u64>,
    /// Requested lifetime in seconds; clamped by the store.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl StoreRequest {
    fn into_message(self) -> MailboxMessage {
        let now = unix_now();
        let created_at = self.created_at.unwrap_or(now);
        let ttl = self.ttl.unwrap_or(DEFAULT_TTL_SECS);
        MailboxMessage {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            recipient_id: self.destination_id,
            ciphertext: self.ciphertext,
            message_kind: self.message_kind,
            created_at,
            expires_at: created_at.saturating_add(ttl),
            replica_target: 0,
        }
    }
}

/// The public surface: health, bootstrap, onion ingress, mailbox CRUD.
pub fn public_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/nodes/bootstrap", get(bootstrap))
        .route("/v1/nodes/register", post(register))
        .route("/v1/onion", post(submit_onion))
        .route("/v1/swarm/messages", post(store_message))
        .route("/v1/swarm/messages/:recipient_id", get(retrieve_messages))
        .route(
            "/v1/swarm/messages/:recipient_id/:id",
            delete(delete_message),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit_layer,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// The inter-node surface; served behind mTLS in production.
pub fn cluster_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/swarm/replicate", post(replicate))
        .route(
            "/v1/swarm/messages/:recipient_id/:id",
            delete(delete_replica),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Development composition without mTLS: the public surface plus the
/// replicate endpoint. The public DELETE handler already covers replica
/// deletes (it skips fan-out for unknown ids), so only the POST is added.
pub fn dev_router(state: Arc<AppState>) -> Router {
    let replicate_only = Router::new()
        .route("/v1/swarm/replicate", post(replicate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(Arc::clone(&state));
    public_router(state).merge(replicate_only)
}

/// Operator counters, served from the metrics listener when configured.
pub fn metrics_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn rate_limit_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>();
    let ip = client_ip(request.headers(), peer);
    if !state.rate_limiter.check(ip) {
        // 429 with an empty body
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(request).await
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use std::sync::atomic::Ordering::Relaxed;
    let router = state.onion_router.stats();
    Json(json!({
        "router": {
            "forwarded": router.forwarded.load(Relaxed),
            "delivered": router.delivered.load(Relaxed),
            "drops_total": router.drops_total.load(Relaxed),
            "drops_malformed": router.drops_malformed.load(Relaxed),
            "drops_bad_mac": router.drops_bad_mac.load(Relaxed),
            "drops_replay": router.drops_replay.load(Relaxed),
            "drops_expired": router.drops_expired.load(Relaxed),
            "drops_undecryptable": router.drops_undecryptable.load(Relaxed),
        },
        "swarm": state.swarm.stats().snapshot(),
        "rate_limit": {
            "total_requests": state.rate_limiter.total_requests.load(Relaxed),
            "limited_requests": state.rate_limiter.limited_requests.load(Relaxed),
            "active_buckets": state.rate_limiter.bucket_count(),
        },
        "directory": {
            "known_nodes": state.directory.node_count(),
            "ring_size": state.directory.ring_len(),
        },
    }))
}

async fn bootstrap(State(state): State<Arc<AppState>>) -> Json<BootstrapBundle> {
    Json(state.directory.bootstrap())
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<NodeRegistration>,
) -> StatusCode {
    match state.directory.register(registration) {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

/// `POST /v1/onion`: the packet ingress.
///
/// 400 for malformed size/version and for every processing drop; 202 when
/// the packet was forwarded; 200 when this node was the terminal hop.
/// All bodies are empty and the response is floored to a uniform minimum
/// latency.
async fn submit_onion(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let started = Instant::now();

    let status = if body.len() != PACKET_LEN || body[0] != VERSION {
        StatusCode::BAD_REQUEST
    } else {
        match state.onion_router.process_packet(&body) {
            RoutingDecision::Forward {
                address,
                packet,
                delay,
            } => {
                forward_packet(&state, address, packet, delay);
                StatusCode::ACCEPTED
            }
            RoutingDecision::Deliver { payload } => deliver_payload(&state, &payload),
            RoutingDecision::Drop => StatusCode::BAD_REQUEST,
        }
    };

    let elapsed = started.elapsed();
    if elapsed < ONION_MIN_LATENCY {
        tokio::time::sleep(ONION_MIN_LATENCY - elapsed).await;
    }
    status.into_response()
}

/// Relay a peeled packet to the next hop after its per-hop delay.
fn forward_packet(state: &AppState, address: SocketAddr, packet: Vec<u8>, delay: Duration) {
    let client = state.peer_client.clone();
    let url = format!("{}://{}/v1/onion", state.peer_scheme, address);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(packet)
            .send()
            .await
        {
            Ok(response) => debug!(%url, status = %response.status(), "Forwarded packet"),
            Err(err) => warn!(%url, "Forwarding failed: {}", err),
        }
    });
}

/// Terminal hop: the payload is a store envelope, zero-padded to the fixed
/// payload size. The enclosed ciphertext stays opaque.
fn deliver_payload(state: &AppState, payload: &[u8]) -> StatusCode {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let request: StoreRequest = match serde_json::from_slice(&payload[..end]) {
        Ok(r) => r,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    match state.swarm.store(request.into_message()) {
        Ok(()) => StatusCode::OK,
        Err(err) => swarm_error_status(&err),
    }
}

async fn store_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StoreRequest>,
) -> Response {
    let message = request.into_message();
    let id = message.id.clone();
    match state.swarm.store(message) {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Err(err) => swarm_error_status(&err).into_response(),
    }
}

async fn retrieve_messages(
    State(state): State<Arc<AppState>>,
    Path(recipient_id): Path<String>,
) -> Response {
    match state.swarm.retrieve(&recipient_id) {
        // Unknown recipients get an empty array, not 404
        Ok(messages) => Json(messages).into_response(),
        Err(err) => swarm_error_status(&err).into_response(),
    }
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path((recipient_id, id)): Path<(String, String)>,
) -> StatusCode {
    match state.swarm.delete(&recipient_id, &id) {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(err) => swarm_error_status(&err),
    }
}

/// Peer push: store locally, never fan out again.
async fn replicate(
    State(state): State<Arc<AppState>>,
    Json(message): Json<MailboxMessage>,
) -> StatusCode {
    match state.swarm.store_replica(message) {
        Ok(()) => StatusCode::OK,
        Err(err) => swarm_error_status(&err),
    }
}

async fn delete_replica(
    State(state): State<Arc<AppState>>,
    Path((recipient_id, id)): Path<(String, String)>,
) -> StatusCode {
    match state.swarm.delete_replica(&recipient_id, &id) {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(err) => swarm_error_status(&err),
    }
}

fn swarm_error_status(err: &SwarmError) -> StatusCode {
    match err {
        SwarmError::Message(GhostTalkError::MessageTooLarge { .. }) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        SwarmError::Message(_) => StatusCode::BAD_REQUEST,
        SwarmError::Storage(StorageError::Full { .. }) => StatusCode::INSUFFICIENT_STORAGE,
        SwarmError::Storage(_) | SwarmError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
