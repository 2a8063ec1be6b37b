//! Mailbox message stored by the swarm

use serde::{Deserialize, Serialize};

use crate::types::base64_bytes;
use crate::{GhostTalkError, Result};

/// Upper bound for a message id.
pub const MAX_ID_LEN: usize = 64;
/// Upper bound for a stored ciphertext.
pub const MAX_CIPHERTEXT_LEN: usize = 64 * 1024;

/// A single end-to-end-encrypted message at rest.
///
/// The node treats `recipient_id` as a routing key and `ciphertext` as an
/// opaque byte array; neither is ever interpreted or logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Stable, globally unique identifier chosen by the sender.
    pub id: String,
    /// Opaque recipient routing key.
    pub recipient_id: String,
    /// End-to-end ciphertext, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// One-byte tag reserved for the client.
    #[serde(default)]
    pub message_kind: u8,
    /// Unix seconds when the node accepted the message.
    pub created_at: u64,
    /// Unix seconds after which the message is gone.
    pub expires_at: u64,
    /// Number of swarm replicas the sender asked for.
    #[serde(default)]
    pub replica_target: u8,
}

impl MailboxMessage {
    /// Validate the identifier fields and ciphertext size.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.len() > MAX_ID_LEN {
            return Err(GhostTalkError::MalformedMessage(format!(
                "id length {} out of range",
                self.id.len()
            )));
        }
        if self.recipient_id.is_empty() || self.recipient_id.len() > MAX_ID_LEN {
            return Err(GhostTalkError::MalformedMessage(format!(
                "recipient_id length {} out of range",
                self.recipient_id.len()
            )));
        }
        if self.id.contains('/') || self.recipient_id.contains('/') {
            return Err(GhostTalkError::MalformedMessage(
                "identifiers must not contain '/'".to_string(),
            ));
        }
        if self.ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(GhostTalkError::MessageTooLarge {
                size: self.ciphertext.len(),
                max: MAX_CIPHERTEXT_LEN,
            });
        }
        if self.expires_at <= self.created_at {
            return Err(GhostTalkError::MalformedMessage(
                "expires_at must be after created_at".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the message has expired at `now` (Unix seconds).
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MailboxMessage {
        MailboxMessage {
            id: "m1".to_string(),
            recipient_id: "R1".to_string(),
            ciphertext: vec![0, 0, 0],
            message_kind: 0,
            created_at: 1_000,
            expires_at: 2_000,
            replica_target: 3,
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let msg = sample();
        let json = serde_json::to_string(&msg).unwrap();
        // ciphertext travels as base64
        assert!(json.contains("\"AAAA\""));
        let back: MailboxMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut msg = sample();
        msg.id = String::new();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_id() {
        let mut msg = sample();
        msg.id = "x".repeat(MAX_ID_LEN + 1);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_slash_in_recipient() {
        let mut msg = sample();
        msg.recipient_id = "a/b".to_string();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_expiry() {
        let mut msg = sample();
        msg.expires_at = msg.created_at;
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversize_ciphertext() {
        let mut msg = sample();
        msg.ciphertext = vec![0u8; MAX_CIPHERTEXT_LEN + 1];
        assert!(matches!(
            msg.validate(),
            Err(GhostTalkError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_is_expired() {
        let msg = sample();
        assert!(!msg.is_expired(1_999));
        assert!(msg.is_expired(2_000));
        assert!(msg.is_expired(3_000));
    }
}
