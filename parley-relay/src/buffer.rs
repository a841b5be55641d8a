//! Per-recipient queues of messages waiting for an offline user.
//!
//! The [`OfflineBuffer`] holds, for each recipient, the messages routed to
//! them while they had no registered session. The whole queue is handed over
//! in arrival order the moment the recipient connects.
//!
//! The buffer does no locking of its own: it lives inside
//! [`crate::store::MessageStore`] and is only touched under the store's lock.

use std::collections::HashMap;

use parley_proto::message::{ChatMessage, UserId};

/// Pending messages for users who are not connected.
///
/// Queues are unbounded and never expire.
#[derive(Debug, Default)]
pub struct OfflineBuffer {
    queues: HashMap<UserId, Vec<ChatMessage>>,
}

impl OfflineBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the tail of its recipient's queue, returning the
    /// new queue length.
    pub fn append(&mut self, msg: ChatMessage) -> usize {
        let queue = self.queues.entry(msg.to.clone()).or_default();
        queue.push(msg);
        queue.len()
    }

    /// Removes and returns every pending message for `user`, oldest first.
    ///
    /// Returns an empty `Vec` if nothing is pending.
    pub fn drain_all(&mut self, user: &UserId) -> Vec<ChatMessage> {
        self.queues.remove(user).unwrap_or_default()
    }

    /// Number of messages currently pending for `user`.
    #[must_use]
    pub fn pending_len(&self, user: &UserId) -> usize {
        self.queues.get(user).map_or(0, Vec::len)
    }
}
