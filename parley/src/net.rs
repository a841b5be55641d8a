//! Networking coordinator between the terminal front end and the relay.
//!
//! [`spawn_net`] opens the WebSocket connection and spawns two background
//! tasks. The front end talks to them through channels only:
//!
//! ```text
//! stdin loop  ─── NetCommand →  command task  ── text frames →  relay
//!             ←── NetEvent ───  reader task   ←─ text frames ──
//! ```

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use parley_proto::codec::{self, CodecError, ServerFrame};
use parley_proto::message::{ChatMessage, UserId};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Default capacity of the command and event channels.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from setting up or using the relay connection.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The configured server URL could not be parsed.
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server URL is not a `ws://` or `wss://` URL.
    #[error("unsupported url scheme {0:?}, expected ws or wss")]
    UnsupportedScheme(String),

    /// The WebSocket handshake did not finish within the connect timeout.
    #[error("timed out connecting to relay")]
    Timeout,

    /// The WebSocket handshake failed.
    #[error("relay connection failed: {0}")]
    Connect(#[source] Box<tungstenite::Error>),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Commands sent from the front end to the networking tasks.
#[derive(Debug)]
pub enum NetCommand {
    /// Send a text message to the configured recipient.
    SendMessage {
        /// The message text to send.
        text: String,
    },
    /// Close the connection and stop the networking tasks.
    Shutdown,
}

/// Events sent from the networking tasks to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A chat message arrived, either buffered or live.
    MessageReceived {
        /// Who sent it.
        from: String,
        /// The message text.
        content: String,
        /// Server timestamp in nanoseconds since the Unix epoch.
        timestamp: i64,
    },
    /// The relay accepted one of our messages.
    Acked {
        /// Id assigned by the relay (the message's server timestamp).
        message_id: i64,
    },
    /// The relay closed the connection or it was lost.
    Disconnected,
    /// A non-fatal problem worth showing to the user.
    Error(String),
}

/// Configuration for the networking layer.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// WebSocket endpoint of the relay (e.g., `ws://localhost:8080/ws`).
    pub server_url: String,
    /// Who we are.
    pub user: UserId,
    /// Who we are talking to.
    pub recipient: UserId,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Capacity for the command and event channels.
    pub channel_capacity: usize,
}

impl NetConfig {
    /// Creates a `NetConfig` with the default timeout and channel capacity.
    #[must_use]
    pub const fn new(server_url: String, user: UserId, recipient: UserId) -> Self {
        Self {
            server_url,
            user,
            recipient,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// The URL to dial: `server_url` with `user` set as a query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidUrl`] or [`NetError::UnsupportedScheme`]
    /// if `server_url` is not a usable WebSocket URL.
    pub fn connect_url(&self) -> Result<Url, NetError> {
        let mut url = Url::parse(&self.server_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(NetError::UnsupportedScheme(url.scheme().to_string()));
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("user", self.user.as_str());
        Ok(url)
    }
}

/// Connect to the relay and spawn the networking tasks.
///
/// Spawns:
///
/// 1. A **reader task** that decodes server frames and forwards them as
///    [`NetEvent`]s, ending with [`NetEvent::Disconnected`].
/// 2. A **command task** that turns [`NetCommand::SendMessage`] into
///    outgoing messages and sends a close frame on [`NetCommand::Shutdown`]
///    or when every command sender has been dropped.
///
/// # Errors
///
/// Returns [`NetError`] if the URL is invalid or the handshake fails or
/// times out.
pub async fn spawn_net(
    config: NetConfig,
) -> Result<(mpsc::Sender<NetCommand>, mpsc::Receiver<NetEvent>), NetError> {
    let url = config.connect_url()?;

    let (ws_stream, _response) =
        tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                tracing::warn!(url = %url, "relay connect timed out");
                NetError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %url, err = %e, "relay connect failed");
                NetError::Connect(Box::new(e))
            })?;

    tracing::info!(user = %config.user, url = %url, "connected to relay");

    let (ws_sender, ws_reader) = ws_stream.split();
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel::<NetCommand>(capacity);
    let (evt_tx, evt_rx) = mpsc::channel::<NetEvent>(capacity);

    tokio::spawn(reader_loop(ws_reader, evt_tx.clone()));
    tokio::spawn(command_loop(
        ws_sender,
        cmd_rx,
        evt_tx,
        config.user,
        config.recipient,
    ));

    Ok((cmd_tx, evt_rx))
}

/// Background task: read server frames until the connection ends.
///
/// Malformed frames are logged and skipped.
async fn reader_loop(mut ws_reader: WsReader, evt_tx: mpsc::Sender<NetEvent>) {
    while let Some(msg_result) = ws_reader.next().await {
        let event = match msg_result {
            Ok(Message::Text(text)) => match codec::decode_frame(&text) {
                Ok(ServerFrame::Message(msg)) => NetEvent::MessageReceived {
                    from: msg.from.to_string(),
                    content: msg.content,
                    timestamp: msg.timestamp,
                },
                Ok(ServerFrame::Ack(ack)) => NetEvent::Acked {
                    message_id: ack.message_id,
                },
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "relay read error");
                break;
            }
        };

        if evt_tx.send(event).await.is_err() {
            // Front end dropped; nothing left to report to.
            return;
        }
    }

    let _ = evt_tx.send(NetEvent::Disconnected).await;
    tracing::debug!("reader task exiting");
}

/// Background task: forward commands to the relay.
async fn command_loop(
    mut ws_sender: WsSender,
    mut cmd_rx: mpsc::Receiver<NetCommand>,
    evt_tx: mpsc::Sender<NetEvent>,
    user: UserId,
    recipient: UserId,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            NetCommand::SendMessage { text } => {
                let msg = ChatMessage::new(user.clone(), recipient.clone(), text);
                let json = match codec::encode_message(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        let _ = evt_tx.send(NetEvent::Error(format!("encode failed: {e}"))).await;
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::text(json)).await {
                    tracing::warn!(err = %e, "relay send failed");
                    let _ = evt_tx.send(NetEvent::Error(format!("send failed: {e}"))).await;
                    return;
                }
                tracing::debug!(to = %recipient, "message sent");
            }
            NetCommand::Shutdown => break,
        }
    }

    tracing::info!("closing relay connection");
    if let Err(e) = ws_sender.send(Message::Close(None)).await {
        tracing::debug!(err = %e, "close frame not sent");
    }
}
