//! GhostTalk Ingress Surface
//!
//! The HTTP face of the node: TLS 1.3 for clients, mTLS for peers,
//! per-IP token-bucket rate limiting, and the route dispatch into the
//! onion router, swarm store and directory.

mod rate_limit;
mod routes;
mod server;

pub use rate_limit::{client_ip, RateLimitConfig, RateLimiter};
pub use routes::{
    cluster_router, dev_router, metrics_router, public_router, AppState, StoreRequest,
};
pub use server::{serve_cluster, serve_metrics, serve_public, MtlsFiles, ServerError, TlsFiles};
