//! Parley relay server library.
//!
//! Exposes the routing store and the relay server for use in tests and
//! embedding. The relay accepts WebSocket connections identified by a
//! username, routes each message to the recipient's live connection or to an
//! offline buffer, and keeps the full history of every conversation.

pub mod buffer;
pub mod config;
pub mod history;
pub mod relay;
pub mod session;
pub mod store;
