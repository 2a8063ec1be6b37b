//! GhostTalk Logging
//!
//! Shared tracing-subscriber setup. `RUST_LOG` overrides the default
//! filter. Nothing in the node ever logs payload bytes or recipient ids
//! at info level or above.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,ghosttalk=debug";

/// Initialize logging for the daemon. Call once at startup.
pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// Initialize with an explicit fallback filter.
pub fn init_with(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
