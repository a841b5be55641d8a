//! Append-only conversation log, one sequence per unordered pair of users.

use std::collections::HashMap;

use parley_proto::message::{ChatMessage, ConversationKey, UserId};

/// Every message ever routed, grouped by [`ConversationKey`].
///
/// Records regardless of delivery outcome. Nothing is ever removed,
/// deduplicated or compacted.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    conversations: HashMap<ConversationKey, Vec<ChatMessage>>,
}

impl ConversationHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to its conversation.
    pub fn append(&mut self, msg: ChatMessage) {
        self.conversations
            .entry(msg.conversation_key())
            .or_default()
            .push(msg);
    }

    /// Returns a copy of the conversation between `a` and `b`, oldest first.
    ///
    /// Argument order does not matter. Unknown pairs yield an empty `Vec`.
    #[must_use]
    pub fn query(&self, a: &UserId, b: &UserId) -> Vec<ChatMessage> {
        self.conversations
            .get(&ConversationKey::new(a, b))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages in the conversation between `a` and `b`.
    #[must_use]
    pub fn conversation_len(&self, a: &UserId, b: &UserId) -> usize {
        self.conversations
            .get(&ConversationKey::new(a, b))
            .map_or(0, Vec::len)
    }
}
