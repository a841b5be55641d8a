//! Live sessions and the registry that maps each user to one of them.
//!
//! A [`Session`] is the receiving end a connection adapter drains: first the
//! messages that were buffered while the user was offline, then whatever is
//! routed to the user live. The [`SessionRegistry`] keeps the sending end.
//!
//! Like the other store parts, the registry does no locking of its own and is
//! only touched under [`crate::store::MessageStore`]'s lock.

use std::collections::{HashMap, VecDeque};

use parley_proto::message::{ChatMessage, UserId};
use tokio::sync::mpsc;

/// Distinguishes successive sessions of the same user.
///
/// A connection that was displaced by a newer one for the same user must not
/// be able to unregister its replacement; comparing ids prevents that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wraps a raw id. Ids are minted by the store.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The delivery end of one user's connection.
///
/// Yields the backlog handed over at registration first, then live messages
/// from the bounded channel. [`Session::recv`] returns `None` once the backlog
/// is empty and the session has been replaced or the store dropped.
#[derive(Debug)]
pub struct Session {
    user: UserId,
    id: SessionId,
    backlog: VecDeque<ChatMessage>,
    rx: mpsc::Receiver<ChatMessage>,
}

impl Session {
    pub(crate) fn new(
        user: UserId,
        id: SessionId,
        backlog: Vec<ChatMessage>,
        rx: mpsc::Receiver<ChatMessage>,
    ) -> Self {
        Self {
            user,
            id,
            backlog: backlog.into(),
            rx,
        }
    }

    /// The user this session delivers to.
    #[must_use]
    pub const fn user(&self) -> &UserId {
        &self.user
    }

    /// This session's id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Number of buffered messages not yet taken from this session.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Waits for the next message for this user.
    ///
    /// Cancel-safe: a backlog entry is only removed when it is returned.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        if let Some(msg) = self.backlog.pop_front() {
            return Some(msg);
        }
        self.rx.recv().await
    }

    /// Returns the next message if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<ChatMessage> {
        self.backlog
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }
}

/// Registry entry: the sending half of a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Which session this sender feeds.
    pub id: SessionId,
    /// Bounded sender into the session's channel.
    pub sender: mpsc::Sender<ChatMessage>,
}

/// Maps each connected user to their one live session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<UserId, SessionHandle>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle` as `user`'s live session.
    ///
    /// Any previous session for the user is replaced and its handle
    /// returned. Dropping the returned handle abandons the old channel.
    pub fn register(&mut self, user: UserId, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(user, handle)
    }

    /// Removes `user`'s live session, whichever it is. No-op if absent.
    pub fn unregister(&mut self, user: &UserId) -> Option<SessionHandle> {
        self.sessions.remove(user)
    }

    /// Removes `user`'s live session only if it is still session `id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister_session(&mut self, user: &UserId, id: SessionId) -> bool {
        if self.sessions.get(user).is_some_and(|h| h.id == id) {
            self.sessions.remove(user);
            return true;
        }
        false
    }

    /// Returns the live session handle for `user`, if connected.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<&SessionHandle> {
        self.sessions.get(user)
    }

    /// Number of connected users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no user is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
