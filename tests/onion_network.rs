//! Integration tests for onion routing across real HTTP nodes
//!
//! Spins up several in-process nodes on loopback listeners and exercises
//! the full packet path: multi-hop forwarding, terminal delivery into the
//! mailbox, replay rejection over the wire, and swarm replica fan-out.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ghosttalk_core::{unix_now, NodeInfo, NodeState, PACKET_LEN};
use ghosttalk_crypto::{EncryptionKeypair, SigningKeypair};
use ghosttalk_directory::Directory;
use ghosttalk_gateway::{dev_router, AppState, RateLimitConfig, RateLimiter};
use ghosttalk_onion::{build_packet, PathHop, ReplayCache, Router as OnionRouter};
use ghosttalk_storage::{Backend, MemoryBackend};
use ghosttalk_swarm::{peer_http_client, ReplicatorConfig, SwarmConfig, SwarmStore};
use serde_json::json;

struct TestNode {
    addr: SocketAddr,
    info: NodeInfo,
    onion_pub: [u8; 32],
    state: Arc<AppState>,
}

impl TestNode {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn hop(&self) -> PathHop {
        PathHop {
            address: self.addr,
            onion_key: self.onion_pub,
            delay_ms: 0,
        }
    }
}

/// Start a node with replication enabled over plain HTTP.
async fn start_node() -> TestNode {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let onion_keys = EncryptionKeypair::generate();
    let onion_pub = onion_keys.public_key_bytes();
    let signing = SigningKeypair::generate();
    let info = NodeInfo {
        public_key: signing.public_key_bytes(),
        onion_key: onion_pub,
        address: addr.to_string(),
        region: None,
        last_seen: 0,
        state: NodeState::Active,
    };
    let directory = Arc::new(Directory::new(signing, info.clone()));
    let swarm = Arc::new(SwarmStore::with_replication(
        Backend::Memory(MemoryBackend::new()),
        SwarmConfig::default(),
        Arc::clone(&directory),
        peer_http_client(Duration::from_secs(5)),
        ReplicatorConfig {
            scheme: "http",
            ..ReplicatorConfig::default()
        },
    ));
    let router = Arc::new(OnionRouter::new(onion_keys, Arc::new(ReplayCache::new())));

    let state = Arc::new(AppState {
        onion_router: router,
        swarm,
        directory,
        rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: false,
            requests_per_second: 100,
            burst: 200,
        })),
        peer_client: peer_http_client(Duration::from_secs(5)),
        peer_scheme: "http",
        started_at: Instant::now(),
    });

    let app = dev_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestNode {
        addr,
        info,
        onion_pub,
        state,
    }
}

fn store_envelope(id: &str, recipient: &str) -> Vec<u8> {
    json!({
        "id": id,
        "destination_id": recipient,
        "ciphertext": "AAAA",
        "ttl": 3600,
    })
    .to_string()
    .into_bytes()
}

/// Poll a node's mailbox until the message shows up.
async fn wait_for_message(node: &TestNode, recipient: &str, id: &str) {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let messages: serde_json::Value = client
            .get(node.url(&format!("/v1/swarm/messages/{recipient}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if messages
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["id"] == id)
        {
            return;
        }
        if Instant::now() > deadline {
            panic!("message {id} never arrived at {}", node.addr);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_two_hop_forward_and_deliver() {
    let relay = start_node().await;
    let terminal = start_node().await;

    let packet = build_packet(
        &[relay.hop(), terminal.hop()],
        &store_envelope("hop2-m1", "R_two_hop"),
        unix_now() + 60,
    )
    .unwrap();

    let response = reqwest::Client::new()
        .post(relay.url("/v1/onion"))
        .header("content-type", "application/octet-stream")
        .body(packet)
        .send()
        .await
        .unwrap();
    // The first hop only forwards
    assert_eq!(response.status(), 202);

    wait_for_message(&terminal, "R_two_hop", "hop2-m1").await;
    assert_eq!(
        terminal
            .state
            .onion_router
            .stats()
            .delivered
            .load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn test_three_hop_chain() {
    let a = start_node().await;
    let b = start_node().await;
    let c = start_node().await;

    let packet = build_packet(
        &[a.hop(), b.hop(), c.hop()],
        &store_envelope("hop3-m1", "R_three_hop"),
        unix_now() + 60,
    )
    .unwrap();

    let response = reqwest::Client::new()
        .post(a.url("/v1/onion"))
        .header("content-type", "application/octet-stream")
        .body(packet)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    wait_for_message(&c, "R_three_hop", "hop3-m1").await;
    // The middle hop forwarded and stored nothing
    assert!(b.state.swarm.retrieve("R_three_hop").unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_rejected_over_http() {
    let node = start_node().await;
    let client = reqwest::Client::new();

    let packet = build_packet(
        &[node.hop()],
        &store_envelope("replay-m1", "R_replay"),
        unix_now() + 60,
    )
    .unwrap();

    let first = client
        .post(node.url("/v1/onion"))
        .header("content-type", "application/octet-stream")
        .body(packet.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    // The resubmission reads like any malformed packet
    let second = client
        .post(node.url("/v1/onion"))
        .header("content-type", "application/octet-stream")
        .body(packet)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 400);

    let stats = node.state.onion_router.stats();
    assert_eq!(stats.drops_total.load(Ordering::Relaxed), 1);
    assert_eq!(stats.delivered.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_malformed_packet_no_side_effects() {
    let node = start_node().await;

    let response = reqwest::Client::new()
        .post(node.url("/v1/onion"))
        .header("content-type", "application/octet-stream")
        .body(vec![1u8; PACKET_LEN - 1])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(node.state.onion_router.replay_cache().is_empty());
}

#[tokio::test]
async fn test_replica_fanout_reaches_swarm_peers() {
    let a = start_node().await;
    let b = start_node().await;
    let c = start_node().await;

    // Every node learns the full membership
    let all = vec![a.info.clone(), b.info.clone(), c.info.clone()];
    for node in [&a, &b, &c] {
        node.state.directory.merge_nodes(all.clone());
    }

    let response = reqwest::Client::new()
        .post(a.url("/v1/swarm/messages"))
        .json(&json!({
            "id": "fan-1",
            "destination_id": "R_fanout",
            "ciphertext": "AAAA",
            "ttl": 3600,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // replica_count = 3: the message reaches every other node
    wait_for_message(&b, "R_fanout", "fan-1").await;
    wait_for_message(&c, "R_fanout", "fan-1").await;
}
