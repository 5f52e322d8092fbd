//! Client against a live server

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use smsdash_api::{
    auth::{ControlKey, MemorySessionStore},
    create_router,
    ingest::MemoryRecordStore,
    realtime::Room,
    AppState, HeartbeatSettings,
};
use smsdash_client::{ConnectionState, RealtimeClient, SendOutcome, TransportKind};
use smsdash_shared::Identity;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

async fn start_server() -> String {
    let sessions = Arc::new(MemorySessionStore::new());
    sessions.insert(
        "token-a",
        Identity {
            id: "auth0|a".to_string(),
            email: "a@example.com".to_string(),
        },
    );

    let state = AppState::new(
        sessions,
        Arc::new(MemoryRecordStore::new()),
        Room::global().spawn(),
        ControlKey::new("client-test-key-that-is-32-chars-long"),
        HeartbeatSettings::default(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    format!("http://{addr}")
}

async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    let reached = timeout(Duration::from_secs(10), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await;
    assert!(reached.is_ok(), "never reached {want:?}");
}

async fn next_of_type(rx: &mut mpsc::UnboundedReceiver<Value>, kind: &str) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let msg = rx.recv().await.unwrap();
            if msg["type"] == kind {
                return msg;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let base = start_server().await;
    let client = RealtimeClient::new(&base).unwrap();
    let mut states = client.watch();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on("*", move |msg| {
        let _ = tx.send(msg.clone());
        Ok(())
    });

    client.connect("token-a").unwrap();
    wait_for(&mut states, ConnectionState::Connected(TransportKind::Primary)).await;

    assert!(next_of_type(&mut rx, "connected").await["sessionId"].is_string());
    let subscribed = next_of_type(&mut rx, "subscribed").await;
    assert_eq!(subscribed["channels"], serde_json::json!(["messages", "phones"]));

    assert_eq!(
        client.send(&serde_json::json!({"type": "ping"})),
        SendOutcome::Sent
    );
    next_of_type(&mut rx, "pong").await;

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_rejected_token_is_terminal() {
    let base = start_server().await;
    let client = RealtimeClient::new(&base).unwrap();
    let mut states = client.watch();

    client.connect("not-a-session").unwrap();
    wait_for(&mut states, ConnectionState::Unauthorized).await;
}
