use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

// ── Identity ─────────────────────────────────────────────────────────────────

/// A server-verified user identifier.
///
/// Values of this type only come out of credential verification; the relay
/// never builds one from client-supplied envelope fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Lets registries keyed by `Identity` be queried with a plain `&str`.
impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── Message type ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Opaque (usually end-to-end encrypted) user content.
    Text,
    /// Client-to-client signalling: typing indicators, read receipts, key
    /// exchange hints.
    Control,
    /// Liveness probe, normally sent with an empty recipient to echo back.
    Ping,
}

impl MessageType {
    /// Durable types are appended to the message store regardless of whether
    /// the recipient is online.
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Text)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Control => "control",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The unit of exchange between clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Client-generated unique token; the store deduplicates on it.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// As received this is whatever the client claimed. The router replaces
    /// it with the authenticated identity before anything else reads it.
    pub sender: String,
    /// Empty means "deliver back to the sender".
    pub recipient: String,
    pub payload: Vec<u8>,
    /// Unix seconds, client clock.
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        kind: MessageType,
        recipient: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            sender: String::new(),
            recipient: recipient.into(),
            payload: payload.into(),
            timestamp,
        }
    }

    /// Overwrite the sender with the identity bound to the connection.
    pub fn stamp_sender(&mut self, sender: &Identity) {
        self.sender.clear();
        self.sender.push_str(sender.as_str());
    }

    pub fn has_recipient(&self) -> bool {
        !self.recipient.is_empty()
    }

    /// Identity the envelope should be delivered to: the recipient, or the
    /// sender itself when no recipient is set.
    pub fn target(&self) -> &str {
        if self.has_recipient() {
            &self.recipient
        } else {
            &self.sender
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_replaces_claimed_sender() {
        let mut env = Envelope::new("m1", MessageType::Text, "alice", b"hi".to_vec(), 0);
        env.sender = "mallory".into();
        env.stamp_sender(&Identity::new("bob"));
        assert_eq!(env.sender, "bob");
    }

    #[test]
    fn empty_recipient_targets_sender() {
        let mut env = Envelope::new("p1", MessageType::Ping, "", Vec::new(), 0);
        env.stamp_sender(&Identity::new("alice"));
        assert!(!env.has_recipient());
        assert_eq!(env.target(), "alice");
    }

    #[test]
    fn explicit_recipient_is_target() {
        let mut env = Envelope::new("m1", MessageType::Text, "alice", Vec::new(), 0);
        env.stamp_sender(&Identity::new("bob"));
        assert_eq!(env.target(), "alice");
    }

    #[test]
    fn only_text_is_durable() {
        assert!(MessageType::Text.is_durable());
        assert!(!MessageType::Control.is_durable());
        assert!(!MessageType::Ping.is_durable());
    }

    #[test]
    fn message_type_serializes_lowercase() {
        let json = serde_json::to_string(&MessageType::Control).unwrap();
        assert_eq!(json, "\"control\"");
    }

    #[test]
    fn identity_is_transparent() {
        let id = Identity::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_eq!(id.to_string(), "alice");
    }
}
