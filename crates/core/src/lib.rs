//! GhostTalk Core Types
//!
//! This crate defines the fundamental data structures shared by every part
//! of the service node: the fixed-size onion packet format, mailbox
//! messages, directory records and the common error type.

mod error;
mod message;
mod node;
mod packet;
mod types;

pub use error::*;
pub use message::*;
pub use node::*;
pub use packet::*;
pub use types::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
