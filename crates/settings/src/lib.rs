//! GhostTalk Settings
//!
//! Node configuration: a single JSON file, every field defaulted so an
//! empty file is a valid development config. `Settings::validate` catches
//! half-configured TLS surfaces before any listener binds.

mod config;

pub use config::{
    MetricsSettings, MtlsSettings, RateLimitSettings, Settings, StorageBackendKind,
    StorageSettings, SwarmSettings, TlsSettings,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("tls needs both cert_file and key_file, only {present} is set")]
    HalfConfiguredTls { present: &'static str },

    #[error("mtls.enabled requires {missing} to be set")]
    IncompleteMutualTls { missing: &'static str },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
