//! GhostTalk Onion Router
//!
//! Peels one layer from each fixed-size onion packet: verify the hop MAC,
//! reject replays, decrypt the leading routing slot, then either forward a
//! re-blinded packet to the next relay or hand the payload to the swarm
//! store. Every failure collapses into a silent drop; only aggregate
//! counters distinguish the reasons.

mod build;
mod replay;
mod router;

pub use build::{build_packet, PathHop};
pub use replay::ReplayCache;
pub use router::{Router, RouterStats, RoutingDecision};
