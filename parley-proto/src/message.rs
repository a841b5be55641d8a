//! Wire format message types for the Parley protocol.
//!
//! Every type here is exchanged as a JSON record over the relay's WebSocket
//! or returned from its history endpoint. Field names follow the JSON wire
//! contract (`messageId` is camelCase, everything else is lowercase).

use serde::{Deserialize, Serialize};

/// Error returned when a user identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidUserId {
    /// The identifier was empty.
    #[error("user id must not be empty")]
    Empty,
}

/// Opaque identifier of a participant.
///
/// Equality is exact: no case folding, trimming, or other normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a validated user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUserId::Empty`] if `id` is empty.
    pub fn parse(id: impl Into<String>) -> Result<Self, InvalidUserId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidUserId::Empty);
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty.
    ///
    /// Only possible for values decoded straight off the wire, which skip
    /// [`UserId::parse`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A direct message between two users.
///
/// `timestamp` is nanoseconds since the Unix epoch as assigned by the relay.
/// Clients may omit it (or send anything); the relay always overwrites it
/// before the message is stored or delivered, and it doubles as the message
/// identifier echoed in [`Ack::message_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Message text.
    pub content: String,
    /// Server-assigned send time in nanoseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    /// Creates an unstamped message (timestamp `0`).
    #[must_use]
    pub fn new(from: impl Into<UserId>, to: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: 0,
        }
    }

    /// Returns the conversation this message belongs to.
    #[must_use]
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.from, &self.to)
    }
}

/// Status reported in an [`Ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// The relay accepted the message. Says nothing about whether the
    /// recipient was online.
    Delivered,
}

/// Best-effort acknowledgment sent back to the sender of a [`ChatMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// The server timestamp of the acknowledged message.
    #[serde(rename = "messageId")]
    pub message_id: i64,
    /// Acceptance status.
    pub status: DeliveryStatus,
}

impl Ack {
    /// Acknowledgment for the routed message stamped `message_id`.
    #[must_use]
    pub const fn delivered(message_id: i64) -> Self {
        Self {
            message_id,
            status: DeliveryStatus::Delivered,
        }
    }
}

/// Canonical, order-independent key for the conversation between two users.
///
/// The pair is stored with the lexicographically smaller id first, so
/// `ConversationKey::new(a, b) == ConversationKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationKey {
    low: UserId,
    high: UserId,
}

impl ConversationKey {
    /// Builds the canonical key for the pair `(a, b)`.
    #[must_use]
    pub fn new(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self {
                low: a.clone(),
                high: b.clone(),
            }
        } else {
            Self {
                low: b.clone(),
                high: a.clone(),
            }
        }
    }

    /// Both participants, smaller id first.
    #[must_use]
    pub const fn participants(&self) -> (&UserId, &UserId) {
        (&self.low, &self.high)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty() {
        assert_eq!(UserId::parse(""), Err(InvalidUserId::Empty));
        assert_eq!(UserId::parse("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn user_id_is_not_normalized() {
        assert_ne!(UserId::from("Alice"), UserId::from("alice"));
        assert_ne!(UserId::from("alice "), UserId::from("alice"));
    }

    #[test]
    fn conversation_key_is_order_independent() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let key = ConversationKey::new(&bob, &alice);
        assert_eq!(key, ConversationKey::new(&alice, &bob));
        assert_eq!(key.participants(), (&alice, &bob));
        assert_eq!(key.to_string(), "alice:bob");
    }

    #[test]
    fn self_conversation_has_a_key() {
        let alice = UserId::from("alice");
        let key = ConversationKey::new(&alice, &alice);
        assert_eq!(key.participants(), (&alice, &alice));
    }

    #[test]
    fn message_json_field_names() {
        let mut msg = ChatMessage::new("alice", "bob", "hi");
        msg.timestamp = 42;
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"from": "alice", "to": "bob", "content": "hi", "timestamp": 42})
        );
    }

    #[test]
    fn message_timestamp_is_optional_on_input() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"from":"alice","to":"bob","content":"hi"}"#).unwrap();
        assert_eq!(msg.timestamp, 0);
    }

    #[test]
    fn ack_uses_camel_case_message_id() {
        let value = serde_json::to_value(Ack::delivered(7)).unwrap();
        assert_eq!(value, serde_json::json!({"messageId": 7, "status": "delivered"}));
    }
}
