//! GhostTalk node binary
//!
//! Loads settings (first CLI argument, `GHOSTTALK_CONFIG`, or the default
//! path), initializes logging and runs the node until interrupted.

use std::path::PathBuf;

use ghosttalk_daemon::Node;
use ghosttalk_settings::Settings;

const DEFAULT_CONFIG_PATH: &str = "ghosttalk/config.json";

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GHOSTTALK_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ghosttalk_logging::init();

    let path = config_path();
    let settings = Settings::load_from(&path)?;
    tracing::info!(node = %settings.node_id, config = ?path, "Starting GhostTalk node");

    let node = Node::build(settings)?;
    node.run().await
}
