//! GhostTalk Directory
//!
//! The node's view of the network: a registry of known service nodes, the
//! consistent-hash ring placing recipient ids onto swarms, the signed
//! bootstrap bundle handed to clients, and the health prober that evicts
//! unresponsive peers from the ring.

mod bundle;
mod health;
mod registry;
mod ring;

pub use bundle::BootstrapBundle;
pub use health::HealthProber;
pub use registry::{Directory, NodeRegistration};
pub use ring::Ring;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Invalid registration signature")]
    InvalidSignature,

    #[error("Unknown node")]
    UnknownNode,
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
