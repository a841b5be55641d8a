//! Serialization and deserialization for the Parley wire protocol.
//!
//! Every record travels as one JSON document in one WebSocket text frame, so
//! no length-prefix framing is needed on top.

use serde::{Deserialize, Serialize};

use crate::message::{Ack, ChatMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A record sent from the relay to a connected client.
///
/// Untagged on the wire: a message and an acknowledgment have disjoint sets
/// of required fields, so the shape alone tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A message addressed to the client (live or replayed from the buffer).
    Message(ChatMessage),
    /// Acknowledgment of a message the client sent.
    Ack(Ack),
}

impl From<ChatMessage> for ServerFrame {
    fn from(msg: ChatMessage) -> Self {
        Self::Message(msg)
    }
}

impl From<Ack> for ServerFrame {
    fn from(ack: Ack) -> Self {
        Self::Ack(ack)
    }
}

/// Encodes a client-to-relay message as JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode_message(msg: &ChatMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a client-to-relay message from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a valid message.
pub fn decode_message(text: &str) -> Result<ChatMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a relay-to-client frame as JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_frame(frame: &ServerFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a relay-to-client frame from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is neither a message nor
/// an acknowledgment.
pub fn decode_frame(text: &str) -> Result<ServerFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}
