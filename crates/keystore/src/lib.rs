//! GhostTalk Keystore
//!
//! Persistence for the node's long-lived identity: the Ed25519 directory
//! key and the X25519 onion key, stored hex-encoded in a single
//! owner-only file. The identity is created once at install and survives
//! every restart; losing it means leaving the directory.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use ghosttalk_crypto::{EncryptionKeypair, NodeIdentity, SigningKeypair};

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed key file: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

/// Hex-encoded 64 bytes: Ed25519 secret followed by X25519 secret.
const KEY_FILE_BYTES: usize = 64;

/// Load the identity at `path`, generating and persisting a fresh one on
/// first run.
pub fn load_or_generate_identity(path: &Path) -> Result<NodeIdentity> {
    if path.exists() {
        load_identity(path)
    } else {
        let identity = NodeIdentity::generate();
        save_identity(path, &identity)?;
        info!(?path, "Generated new node identity");
        Ok(identity)
    }
}

pub fn load_identity(path: &Path) -> Result<NodeIdentity> {
    let content = fs::read_to_string(path)?;
    let bytes = hex::decode(content.trim())
        .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
    if bytes.len() != KEY_FILE_BYTES {
        return Err(KeystoreError::Malformed(format!(
            "expected {} key bytes, found {}",
            KEY_FILE_BYTES,
            bytes.len()
        )));
    }

    let mut signing_secret = [0u8; 32];
    signing_secret.copy_from_slice(&bytes[..32]);
    let mut onion_secret = [0u8; 32];
    onion_secret.copy_from_slice(&bytes[32..]);

    Ok(NodeIdentity {
        signing: SigningKeypair::from_secret_bytes(&signing_secret),
        onion: EncryptionKeypair::from_secret_bytes(&onion_secret),
    })
}

pub fn save_identity(path: &Path, identity: &NodeIdentity) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut bytes = Vec::with_capacity(KEY_FILE_BYTES);
    bytes.extend_from_slice(&identity.signing.secret_key_bytes());
    bytes.extend_from_slice(&identity.onion.secret_key_bytes());
    fs::write(path, hex::encode(&bytes))?;

    // Owner-only read: the file holds both private keys
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
