//! Relay server: shared state, HTTP routes, and the per-connection
//! WebSocket handler.
//!
//! The handler is a thin adapter around [`MessageStore`]: it registers the
//! connecting user, pumps the user's session onto the socket, feeds every
//! decoded inbound message to [`MessageStore::send`], and unregisters the
//! session when either direction fails, a frame does not decode, or the
//! client closes.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parley_proto::codec::{self, CodecError, ServerFrame};
use parley_proto::message::{Ack, UserId};
use tokio::sync::mpsc;

use crate::store::MessageStore;

/// Default maximum size of one inbound WebSocket frame in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Shared relay server state.
pub struct RelayState {
    /// Routing and delivery store shared by every connection.
    pub store: MessageStore,
    /// Maximum allowed inbound frame size in bytes.
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty store and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: MessageStore::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Creates relay state with a custom frame size limit and store.
    #[must_use]
    pub const fn with_config(max_frame_size: usize, store: MessageStore) -> Self {
        Self {
            store,
            max_frame_size,
        }
    }
}

/// Query string of `GET /ws`.
#[derive(Debug, serde::Deserialize)]
struct ConnectParams {
    user: Option<String>,
}

/// Query string of `GET /messages`.
#[derive(Debug, serde::Deserialize)]
struct HistoryParams {
    user1: Option<String>,
    user2: Option<String>,
}

/// Builds the relay's HTTP router.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/messages", get(history_handler))
        .with_state(state)
}

/// axum handler that validates the `user` parameter and upgrades the
/// request to a WebSocket connection.
async fn ws_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<RelayState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(user) = UserId::parse(params.user.unwrap_or_default()) else {
        tracing::warn!("rejected connection without user");
        return (StatusCode::BAD_REQUEST, "Missing user param").into_response();
    };

    ws.max_message_size(state.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// axum handler returning the stored conversation between two users.
async fn history_handler(
    Query(params): Query<HistoryParams>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let (Ok(user1), Ok(user2)) = (
        UserId::parse(params.user1.unwrap_or_default()),
        UserId::parse(params.user2.unwrap_or_default()),
    ) else {
        return (StatusCode::BAD_REQUEST, "Missing user1 or user2").into_response();
    };

    axum::Json(state.store.history(&user1, &user2)).into_response()
}

/// Handles an upgraded WebSocket connection for a single user.
///
/// The connection lifecycle:
/// 1. Register the user, receiving any messages buffered while offline.
/// 2. Spawn a writer task draining the session and acknowledgments.
/// 3. Read messages from the socket, routing each and queueing an ack.
///    A frame that does not decode ends the connection.
/// 4. When either task ends, stop the other and unregister the session.
pub async fn handle_socket(socket: WebSocket, user: UserId, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut session = state.store.connect(user.clone());
    let session_id = session.id();
    // Bounded like the session: a stalled socket stops this user's reads.
    let (ack_tx, mut ack_rx) = mpsc::channel::<Ack>(state.store.channel_capacity());

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                msg = session.recv() => {
                    if let Some(msg) = msg {
                        ServerFrame::from(msg)
                    } else {
                        // Replaced by a newer connection for the same user.
                        tracing::info!(user = %writer_user, "session closed, closing socket");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
                Some(ack) = ack_rx.recv() => ServerFrame::from(ack),
            };
            if let Err(e) = send_frame(&mut ws_sender, &frame).await {
                tracing::warn!(user = %writer_user, error = %e, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) =
                        handle_text_message(&reader_user, text.as_str(), &reader_state, &ack_tx).await
                    {
                        tracing::warn!(user = %reader_user, error = %e, "undecodable frame, closing connection");
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                Message::Binary(_) => {
                    tracing::warn!(user = %reader_user, "ignoring binary frame");
                }
                _ => {
                    // Ping and pong are answered by the socket itself.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.store.disconnect(&user, session_id);
}

/// Decodes one inbound text frame, routes it and queues its ack.
///
/// A message without a recipient is logged and skipped. A message with no
/// sender is attributed to the connected user. Waits for room in `acks`
/// when the writer has fallen behind.
///
/// # Errors
///
/// Returns [`CodecError`] if the frame is not a valid message; the caller
/// treats that as the end of the connection.
async fn handle_text_message(
    user: &UserId,
    text: &str,
    state: &RelayState,
    acks: &mpsc::Sender<Ack>,
) -> Result<(), CodecError> {
    let mut msg = codec::decode_message(text)?;

    if msg.to.is_empty() {
        tracing::warn!(user = %user, "message has no recipient, dropping");
        return Ok(());
    }
    if msg.from.is_empty() {
        msg.from = user.clone();
    }

    let receipt = state.store.send(msg).await;
    // Fails only once the writer is gone, and the connection with it.
    let _ = acks.send(Ack::delivered(receipt.timestamp)).await;
    Ok(())
}

/// Encodes and sends one frame as a WebSocket text message.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let text = codec::encode_frame(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// completes.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}
