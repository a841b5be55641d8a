// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Store-and-forward behaviour seen from a `parley::net` client: messages
//! sent to an offline user are buffered by the relay and handed over, in
//! order and exactly once, when that user connects.

use std::sync::Arc;
use std::time::Duration;

use parley::net::{self, NetCommand, NetConfig, NetEvent};
use parley_proto::message::UserId;
use parley_relay::relay::{self, RelayState};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_relay() -> (String, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), state)
}

async fn connect_client(
    url: &str,
    user: &str,
    recipient: &str,
) -> (mpsc::Sender<NetCommand>, mpsc::Receiver<NetEvent>) {
    let config = NetConfig::new(url.to_string(), UserId::from(user), UserId::from(recipient));
    net::spawn_net(config).await.unwrap()
}

async fn wait_connected(state: &RelayState, user: &str, connected: bool) {
    let user = UserId::from(user);
    for _ in 0..200 {
        if state.store.is_connected(&user) == connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{user} never became connected={connected}");
}

async fn next_event(rx: &mut mpsc::Receiver<NetEvent>) -> NetEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a net event")
        .expect("net event channel closed")
}

/// Send `text` and wait for the relay's acknowledgment.
async fn send_acked(
    tx: &mpsc::Sender<NetCommand>,
    rx: &mut mpsc::Receiver<NetEvent>,
    text: &str,
) -> i64 {
    tx.send(NetCommand::SendMessage {
        text: text.to_string(),
    })
    .await
    .unwrap();
    match next_event(rx).await {
        NetEvent::Acked { message_id } => message_id,
        other => panic!("expected Acked, got {other:?}"),
    }
}

async fn recv_message(rx: &mut mpsc::Receiver<NetEvent>) -> (String, String, i64) {
    match next_event(rx).await {
        NetEvent::MessageReceived {
            from,
            content,
            timestamp,
        } => (from, content, timestamp),
        other => panic!("expected MessageReceived, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffered_messages_arrive_in_order_on_connect() {
    let (url, state) = start_relay().await;
    let (alice_tx, mut alice_rx) = connect_client(&url, "alice", "bob").await;

    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        ids.push(send_acked(&alice_tx, &mut alice_rx, text).await);
    }
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ack ids {ids:?}");
    assert_eq!(state.store.pending_len(&UserId::from("bob")), 3);

    let (_bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    for (expected, id) in ["one", "two", "three"].into_iter().zip(&ids) {
        let (from, content, timestamp) = recv_message(&mut bob_rx).await;
        assert_eq!(from, "alice");
        assert_eq!(content, expected);
        assert_eq!(timestamp, *id);
    }
    assert_eq!(state.store.pending_len(&UserId::from("bob")), 0);
}

#[tokio::test]
async fn buffered_backlog_precedes_later_live_messages() {
    let (url, state) = start_relay().await;
    let (alice_tx, mut alice_rx) = connect_client(&url, "alice", "bob").await;

    send_acked(&alice_tx, &mut alice_rx, "while offline 1").await;
    send_acked(&alice_tx, &mut alice_rx, "while offline 2").await;

    let (_bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    // No wait for registration: this one may be buffered or live.
    send_acked(&alice_tx, &mut alice_rx, "after connect").await;

    let mut contents = Vec::new();
    for _ in 0..3 {
        contents.push(recv_message(&mut bob_rx).await.1);
    }
    assert_eq!(contents, ["while offline 1", "while offline 2", "after connect"]);
    wait_connected(&state, "bob", true).await;
    assert_eq!(state.store.pending_len(&UserId::from("bob")), 0);
}

#[tokio::test]
async fn reconnecting_user_gets_messages_sent_while_away() {
    let (url, state) = start_relay().await;
    let (alice_tx, mut alice_rx) = connect_client(&url, "alice", "bob").await;

    let (bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    wait_connected(&state, "bob", true).await;
    bob_tx.send(NetCommand::Shutdown).await.unwrap();
    assert_eq!(next_event(&mut bob_rx).await, NetEvent::Disconnected);
    wait_connected(&state, "bob", false).await;

    send_acked(&alice_tx, &mut alice_rx, "missed you").await;
    assert_eq!(state.store.pending_len(&UserId::from("bob")), 1);

    let (_bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    let (_, content, _) = recv_message(&mut bob_rx).await;
    assert_eq!(content, "missed you");

    // Delivered once: history has it, the buffer does not.
    let history = state
        .store
        .history(&UserId::from("alice"), &UserId::from("bob"));
    assert_eq!(history.len(), 1);
    assert_eq!(state.store.pending_len(&UserId::from("bob")), 0);
}
