//! The message routing and delivery store.
//!
//! [`MessageStore`] owns the session registry, the offline buffer and the
//! conversation history behind a single lock, so that "register and flush the
//! buffer" and "record to history and decide live-vs-buffered" are each one
//! atomic step. Every message is therefore delivered live XOR buffered, and
//! buffered messages always reach a reconnecting user before anything sent
//! after they connected.
//!
//! The lock is never held across an `.await`. A live delivery clones the
//! recipient's sender under the lock and then waits for channel capacity
//! outside it, so a slow consumer throttles only the senders writing to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use parley_proto::message::{ChatMessage, UserId};
use tokio::sync::mpsc;

use crate::buffer::OfflineBuffer;
use crate::history::ConversationHistory;
use crate::session::{Session, SessionHandle, SessionId, SessionRegistry};

/// Default number of undelivered live messages a session may hold before
/// senders to it are made to wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Where [`MessageStore::send`] put a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Written to the recipient's live session.
    Live,
    /// Appended to the recipient's offline buffer.
    Buffered {
        /// Messages now pending for the recipient.
        pending: usize,
    },
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Server timestamp stamped onto the message; doubles as its id.
    pub timestamp: i64,
    /// How the message was routed.
    pub route: Route,
}

#[derive(Debug, Default)]
struct StoreState {
    sessions: SessionRegistry,
    buffer: OfflineBuffer,
    history: ConversationHistory,
    last_timestamp: i64,
}

/// Routing decision taken under the lock.
enum Delivery {
    /// Write to this session once the lock is released.
    Live(SessionHandle, ChatMessage),
    /// Already appended to the offline buffer.
    Buffered { timestamp: i64, pending: usize },
}

impl Delivery {
    const fn timestamp(&self) -> i64 {
        match self {
            Self::Live(_, msg) => msg.timestamp,
            Self::Buffered { timestamp, .. } => *timestamp,
        }
    }
}

impl StoreState {
    /// Picks the recipient's live session, or buffers the message if there
    /// is none. Buffering happens here, inside the caller's critical section,
    /// so a concurrent `connect` either sees the message in the buffer or
    /// the message sees the new session.
    fn route(&mut self, msg: ChatMessage) -> Delivery {
        if let Some(handle) = self.sessions.lookup(&msg.to) {
            return Delivery::Live(handle.clone(), msg);
        }
        let to = msg.to.clone();
        let timestamp = msg.timestamp;
        let pending = self.buffer.append(msg);
        tracing::info!(to = %to, pending = pending, "recipient offline, message buffered");
        Delivery::Buffered { timestamp, pending }
    }

    /// Wall-clock nanoseconds, bumped past the previous stamp if the clock
    /// has not advanced. Always non-zero and strictly increasing per store.
    fn next_timestamp(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
        let ts = now.max(self.last_timestamp.saturating_add(1));
        self.last_timestamp = ts;
        ts
    }
}

/// A routed message waiting for room in a live session's channel.
///
/// If the waiting `send` future is dropped, the message is handed to the
/// recipient's current session when it has room, and buffered otherwise.
/// Either way it is not lost.
struct InFlight<'a> {
    state: &'a RwLock<StoreState>,
    msg: Option<ChatMessage>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(msg) = self.msg.take() else {
            return;
        };
        let mut state = self.state.write();
        let msg = match state.sessions.lookup(&msg.to) {
            Some(handle) => match handle.sender.try_send(msg) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(msg) | mpsc::error::TrySendError::Closed(msg)) => {
                    msg
                }
            },
            None => msg,
        };
        let to = msg.to.clone();
        let pending = state.buffer.append(msg);
        tracing::warn!(to = %to, pending = pending, "send cancelled while waiting, message buffered");
    }
}

/// In-memory store routing messages between users.
///
/// Construct one per server (or per test) and share it behind an `Arc`.
pub struct MessageStore {
    state: RwLock<StoreState>,
    channel_capacity: usize,
    next_session_id: AtomicU64,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Creates an empty store with the default session channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty store whose sessions buffer up to `channel_capacity`
    /// live messages. A capacity of zero is raised to one.
    #[must_use]
    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            channel_capacity: channel_capacity.max(1),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Registers a new live session for `user` and hands it everything that
    /// was buffered for them, oldest first.
    ///
    /// Replaces any session the user already had; the old one receives
    /// nothing further and its channel closes once in-flight sends finish.
    pub fn connect(&self, user: UserId) -> Session {
        let (sender, rx) = mpsc::channel(self.channel_capacity);
        let id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));

        let mut state = self.state.write();
        let displaced = state
            .sessions
            .register(user.clone(), SessionHandle { id, sender });
        let backlog = state.buffer.drain_all(&user);
        drop(state);

        if let Some(old) = displaced {
            tracing::info!(user = %user, old_session = %old.id, session = %id, "replaced existing session");
        }
        tracing::info!(user = %user, session = %id, buffered = backlog.len(), "user connected");

        Session::new(user, id, backlog, rx)
    }

    /// Unregisters session `id` of `user`.
    ///
    /// A no-op if the user has since connected again with a newer session.
    /// Returns `true` if the session was removed.
    pub fn disconnect(&self, user: &UserId, id: SessionId) -> bool {
        let removed = self.state.write().sessions.unregister_session(user, id);
        if removed {
            tracing::info!(user = %user, session = %id, "user disconnected");
        } else {
            tracing::debug!(user = %user, session = %id, "stale session disconnected");
        }
        removed
    }

    /// Unregisters whatever session `user` has. No-op if not connected.
    pub fn unregister(&self, user: &UserId) -> bool {
        self.state.write().sessions.unregister(user).is_some()
    }

    /// Stamps, records and routes one message.
    ///
    /// The message is always appended to its conversation history. It is
    /// then written to the recipient's live session, or buffered if the
    /// recipient has none. If the session's channel is full this waits until
    /// it drains or the session goes away; a session that went away is
    /// unregistered and the message is routed again.
    ///
    /// Cancel-safe: dropping the future while it waits for channel room
    /// still leaves the message with the recipient's session or buffer.
    pub async fn send(&self, mut msg: ChatMessage) -> SendReceipt {
        let mut next = {
            let mut state = self.state.write();
            msg.timestamp = state.next_timestamp();
            state.history.append(msg.clone());
            tracing::debug!(
                from = %msg.from,
                to = %msg.to,
                timestamp = msg.timestamp,
                len = msg.content.len(),
                "routing message"
            );
            state.route(msg)
        };
        let timestamp = next.timestamp();

        loop {
            let (SessionHandle { id, sender }, msg) = match next {
                Delivery::Buffered { pending, .. } => {
                    return SendReceipt {
                        timestamp,
                        route: Route::Buffered { pending },
                    };
                }
                Delivery::Live(handle, msg) => (handle, msg),
            };

            // Held across the wait so a cancelled send still lands somewhere.
            let mut in_flight = InFlight {
                state: &self.state,
                msg: Some(msg),
            };
            let reserved = sender.reserve().await;
            match (reserved, in_flight.msg.take()) {
                (Ok(permit), Some(msg)) => {
                    permit.send(msg);
                    return SendReceipt {
                        timestamp,
                        route: Route::Live,
                    };
                }
                (Err(_), Some(msg)) => {
                    // The session closed between lookup and write.
                    tracing::warn!(to = %msg.to, session = %id, "live delivery failed, rerouting");
                    let mut state = self.state.write();
                    state.sessions.unregister_session(&msg.to, id);
                    next = state.route(msg);
                }
                (_, None) => unreachable!("in-flight message is only taken here or on drop"),
            }
        }
    }

    /// Returns the conversation between `a` and `b`, oldest first.
    ///
    /// Symmetric in its arguments.
    #[must_use]
    pub fn history(&self, a: &UserId, b: &UserId) -> Vec<ChatMessage> {
        self.state.read().history.query(a, b)
    }

    /// Number of messages buffered for `user`.
    #[must_use]
    pub fn pending_len(&self, user: &UserId) -> usize {
        self.state.read().buffer.pending_len(user)
    }

    /// Whether `user` currently has a live session.
    #[must_use]
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.state.read().sessions.lookup(user).is_some()
    }

    /// Capacity of each session's live channel.
    #[must_use]
    pub const fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Number of users with a live session.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.state.read().sessions.len()
    }
}
