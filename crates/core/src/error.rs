use thiserror::Error;

#[derive(Error, Debug)]
pub enum GhostTalkError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Directory error: {0}")]
    DirectoryError(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Not found")]
    NotFound,

    #[error("Rate limited")]
    RateLimited,

    #[error("Timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, GhostTalkError>;
