// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! End-to-end chat between two `parley::net` clients through an in-process
//! relay.
//!
//! Covers live delivery, acknowledgments carrying the server timestamp,
//! history ordering, and connection teardown from the client side.

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

/// Poll the store until `user`'s registration state matches `connected`.
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

async fn send_text(tx: &mpsc::Sender<NetCommand>, text: &str) {
    tx.send(NetCommand::SendMessage {
        text: text.to_string(),
    })
    .await
    .unwrap();
}

async fn expect_ack(rx: &mut mpsc::Receiver<NetEvent>) -> i64 {
    match next_event(rx).await {
        NetEvent::Acked { message_id } => message_id,
        other => panic!("expected Acked, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_recipient_receives_and_sender_is_acked() {
    let (url, state) = start_relay().await;
    let (alice_tx, mut alice_rx) = connect_client(&url, "alice", "bob").await;
    let (_bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    wait_connected(&state, "alice", true).await;
    wait_connected(&state, "bob", true).await;

    send_text(&alice_tx, "hello bob").await;

    let message_id = expect_ack(&mut alice_rx).await;
    match next_event(&mut bob_rx).await {
        NetEvent::MessageReceived {
            from,
            content,
            timestamp,
        } => {
            assert_eq!(from, "alice");
            assert_eq!(content, "hello bob");
            assert_eq!(timestamp, message_id);
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }

    let history = state
        .store
        .history(&UserId::from("alice"), &UserId::from("bob"));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp, message_id);
}

#[tokio::test]
async fn history_keeps_both_directions_in_send_order() {
    let (url, state) = start_relay().await;
    let (alice_tx, mut alice_rx) = connect_client(&url, "alice", "bob").await;
    let (bob_tx, mut bob_rx) = connect_client(&url, "bob", "alice").await;
    wait_connected(&state, "alice", true).await;
    wait_connected(&state, "bob", true).await;

    send_text(&alice_tx, "hi").await;
    let first = expect_ack(&mut alice_rx).await;
    assert!(matches!(next_event(&mut bob_rx).await, NetEvent::MessageReceived { .. }));

    send_text(&bob_tx, "hey").await;
    let second = expect_ack(&mut bob_rx).await;
    assert!(second > first, "ack ids must increase");

    let alice = UserId::from("alice");
    let bob = UserId::from("bob");
    let history = state.store.history(&bob, &alice);
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["hi", "hey"]);
    assert_eq!(history, state.store.history(&alice, &bob));
}

#[tokio::test]
async fn message_to_self_is_delivered_and_acked() {
    let (url, state) = start_relay().await;
    let (tx, mut rx) = connect_client(&url, "alice", "alice").await;
    wait_connected(&state, "alice", true).await;

    send_text(&tx, "note to self").await;

    // The echo and the ack race each other onto the socket.
    let events = [next_event(&mut rx).await, next_event(&mut rx).await];
    let timestamp = events.iter().find_map(|e| match e {
        NetEvent::MessageReceived { timestamp, .. } => Some(*timestamp),
        _ => None,
    });
    let message_id = events.iter().find_map(|e| match e {
        NetEvent::Acked { message_id } => Some(*message_id),
        _ => None,
    });
    assert!(timestamp.is_some(), "no message in {events:?}");
    assert_eq!(timestamp, message_id);
}

#[tokio::test]
async fn shutdown_closes_connection_and_unregisters() {
    let (url, state) = start_relay().await;
    let (tx, mut rx) = connect_client(&url, "alice", "bob").await;
    wait_connected(&state, "alice", true).await;

    tx.send(NetCommand::Shutdown).await.unwrap();

    assert_eq!(next_event(&mut rx).await, NetEvent::Disconnected);
    wait_connected(&state, "alice", false).await;
}

#[tokio::test]
async fn dropping_command_sender_closes_connection() {
    let (url, state) = start_relay().await;
    let (tx, mut rx) = connect_client(&url, "alice", "bob").await;
    wait_connected(&state, "alice", true).await;

    drop(tx);

    assert_eq!(next_event(&mut rx).await, NetEvent::Disconnected);
    wait_connected(&state, "alice", false).await;
}

#[tokio::test]
async fn second_login_displaces_first_client() {
    let (url, state) = start_relay().await;
    let (_old_tx, mut old_rx) = connect_client(&url, "alice", "bob").await;
    wait_connected(&state, "alice", true).await;

    let (_new_tx, mut new_rx) = connect_client(&url, "alice", "bob").await;
    assert_eq!(next_event(&mut old_rx).await, NetEvent::Disconnected);

    // The replacement stays registered and receives traffic.
    let (bob_tx, _bob_rx) = connect_client(&url, "bob", "alice").await;
    send_text(&bob_tx, "are you there").await;
    match next_event(&mut new_rx).await {
        NetEvent::MessageReceived { content, .. } => assert_eq!(content, "are you there"),
        other => panic!("expected MessageReceived, got {other:?}"),
    }
    assert!(state.store.is_connected(&UserId::from("alice")));
}
