//! Configuration types

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Operator-facing display name
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Where the node identity keys live
    #[serde(default = "default_private_key_file")]
    pub private_key_file: PathBuf,

    /// Public HTTPS listener
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Address published to the directory; defaults to the listen address
    #[serde(default)]
    pub public_address: Option<String>,

    /// Peers contacted for the initial directory view
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,

    #[serde(default)]
    pub tls: TlsSettings,

    #[serde(default)]
    pub mtls: MtlsSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub swarm: SwarmSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

fn default_node_id() -> String {
    "ghosttalk-node".to_string()
}

fn default_private_key_file() -> PathBuf {
    PathBuf::from("ghosttalk/identity.key")
}

fn default_listen_address() -> String {
    "0.0.0.0:8443".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let content =
            serde_json::to_string_pretty(self).expect("settings serialization is infallible");
        std::fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Reject TLS surfaces that are only half configured. A cert without
    /// its key (or the reverse) would otherwise surface as an opaque
    /// listener error at bind time.
    pub fn validate(&self) -> Result<()> {
        match (&self.tls.cert_file, &self.tls.key_file) {
            (Some(_), None) => {
                return Err(SettingsError::HalfConfiguredTls {
                    present: "tls.cert_file",
                })
            }
            (None, Some(_)) => {
                return Err(SettingsError::HalfConfiguredTls {
                    present: "tls.key_file",
                })
            }
            _ => {}
        }
        if self.mtls.enabled {
            if self.mtls.ca_file.is_none() {
                return Err(SettingsError::IncompleteMutualTls {
                    missing: "mtls.ca_file",
                });
            }
            if self.mtls.cert_file.is_none() {
                return Err(SettingsError::IncompleteMutualTls {
                    missing: "mtls.cert_file",
                });
            }
            if self.mtls.key_file.is_none() {
                return Err(SettingsError::IncompleteMutualTls {
                    missing: "mtls.key_file",
                });
            }
        }
        Ok(())
    }

    /// The address peers and clients should dial.
    pub fn published_address(&self) -> &str {
        self.public_address.as_deref().unwrap_or(&self.listen_address)
    }
}

/// Client-facing TLS; absent files mean a plaintext dev listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// Inter-node mTLS; when enabled, replication moves to its own listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MtlsSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Dedicated cluster listener for peer traffic
    #[serde(default = "default_mtls_listen")]
    pub listen_address: String,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_mtls_listen() -> String {
    "0.0.0.0:8444".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// In-memory map; contents die with the process
    Memory,
    /// Embedded ordered key-value store on disk
    #[default]
    EmbeddedLsm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackendKind,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// 0 disables the size guard
    #[serde(default)]
    pub max_size_gb: u64,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("ghosttalk/storage")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            path: default_storage_path(),
            max_size_gb: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSettings {
    #[serde(default = "default_replica_count")]
    pub replica_count: u8,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

fn default_replica_count() -> u8 {
    3
}

fn default_ttl_days() -> u64 {
    14
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            replica_count: default_replica_count(),
            ttl_days: default_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_true() -> bool {
    true
}

fn default_rps() -> u32 {
    100
}

fn default_burst() -> u32 {
    200
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Metrics listener; unset disables the endpoint
    #[serde(default)]
    pub listen_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_valid_config() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.node_id, "ghosttalk-node");
        assert_eq!(settings.swarm.replica_count, 3);
        assert_eq!(settings.swarm.ttl_days, 14);
        assert!(settings.rate_limit.enabled);
        assert_eq!(settings.rate_limit.requests_per_second, 100);
        assert_eq!(settings.rate_limit.burst, 200);
        assert_eq!(settings.storage.backend, StorageBackendKind::EmbeddedLsm);
        assert!(!settings.mtls.enabled);
        assert!(settings.metrics.listen_address.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/settings.json");

        let mut settings = Settings::default();
        settings.node_id = "relay-7".to_string();
        settings.swarm.replica_count = 5;
        settings.bootstrap_nodes = vec!["10.0.0.1:8443".to_string()];
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.node_id, "relay-7");
        assert_eq!(loaded.swarm.replica_count, 5);
        assert_eq!(loaded.bootstrap_nodes.len(), 1);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load_from(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(settings.listen_address, "0.0.0.0:8443");
    }

    #[test]
    fn test_published_address_fallback() {
        let mut settings = Settings::default();
        assert_eq!(settings.published_address(), "0.0.0.0:8443");
        settings.public_address = Some("relay.example.org:443".to_string());
        assert_eq!(settings.published_address(), "relay.example.org:443");
    }

    #[test]
    fn test_unparseable_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_cert_without_key() {
        let mut settings = Settings::default();
        settings.tls.cert_file = Some(PathBuf::from("node.crt"));
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::HalfConfiguredTls {
                present: "tls.cert_file"
            })
        ));

        settings.tls.key_file = Some(PathBuf::from("node.key"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mtls_without_ca() {
        let mut settings = Settings::default();
        settings.mtls.enabled = true;
        settings.mtls.cert_file = Some(PathBuf::from("cluster.crt"));
        settings.mtls.key_file = Some(PathBuf::from("cluster.key"));
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::IncompleteMutualTls {
                missing: "mtls.ca_file"
            })
        ));

        settings.mtls.ca_file = Some(PathBuf::from("cluster-ca.crt"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_backend_kind_names() {
        let settings: Settings =
            serde_json::from_str(r#"{"storage": {"backend": "memory"}}"#).unwrap();
        assert_eq!(settings.storage.backend, StorageBackendKind::Memory);

        let settings: Settings =
            serde_json::from_str(r#"{"storage": {"backend": "embedded_lsm"}}"#).unwrap();
        assert_eq!(settings.storage.backend, StorageBackendKind::EmbeddedLsm);
    }
}
