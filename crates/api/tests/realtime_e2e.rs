//! End-to-end realtime tests against a live server on an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use smsdash_api::{
    auth::{ControlKey, MemorySessionStore, API_KEY_HEADER},
    create_router,
    ingest::MemoryRecordStore,
    realtime::Room,
    AppState, HeartbeatSettings,
};
use smsdash_shared::Identity;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const KEY: &str = "e2e-control-key-that-is-32-chars-long";

struct TestServer {
    addr: SocketAddr,
    records: Arc<MemoryRecordStore>,
}

impl TestServer {
    async fn start() -> Self {
        let sessions = Arc::new(MemorySessionStore::new());
        for (token, email) in [("token-a", "a@example.com"), ("token-b", "b@example.com")] {
            sessions.insert(
                token,
                Identity {
                    id: format!("auth0|{email}"),
                    email: email.to_string(),
                },
            );
        }

        let records = Arc::new(MemoryRecordStore::new());
        let state = AppState::new(
            sessions,
            records.clone(),
            Room::global().spawn(),
            ControlKey::new(KEY),
            HeartbeatSettings {
                sse: Duration::from_secs(1),
                ws: Duration::from_secs(30),
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        Self { addr, records }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn ws(&self, token: &str) -> Ws {
        let url = format!("ws://{}/api/ws?token={}", self.addr, token);
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn stats(&self) -> Value {
        reqwest::Client::new()
            .get(self.url("/api/realtime/stats"))
            .header(API_KEY_HEADER, KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

/// Next JSON text frame, skipping protocol frames
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let res = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

#[tokio::test]
async fn test_connect_presence_and_ping() {
    let server = TestServer::start().await;

    let mut a = server.ws("token-a").await;
    let hello = next_json(&mut a).await;
    assert_eq!(hello["type"], "connected");
    assert!(hello["sessionId"].is_string());
    assert_eq!(next_json(&mut a).await["data"].as_array().unwrap().len(), 1);

    let mut b = server.ws("token-b").await;
    assert_eq!(next_json(&mut b).await["type"], "connected");

    let roster_b = next_json(&mut b).await;
    let roster_a = next_json(&mut a).await;
    for roster in [&roster_a, &roster_b] {
        assert_eq!(roster["type"], "activeUsers");
        let mut emails: Vec<&str> = roster["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["email"].as_str().unwrap())
            .collect();
        emails.sort_unstable();
        assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
    }

    a.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    let pong = next_json(&mut a).await;
    assert_eq!(pong["type"], "pong");
    assert_silent(&mut b).await;

    a.send(Message::Text(r#"{"type":"subscribe","channels":["phones"]}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut a).await, json!({"type": "subscribed", "channels": ["phones"]}));

    a.send(Message::Text(r#"{"type":"typing"}"#.into())).await.unwrap();
    assert_eq!(
        next_json(&mut a).await,
        json!({"type": "error", "message": "Unknown message type"})
    );
}

#[tokio::test]
async fn test_disconnect_updates_presence() {
    let server = TestServer::start().await;

    let mut a = server.ws("token-a").await;
    next_json(&mut a).await;
    next_json(&mut a).await;

    let mut b = server.ws("token-b").await;
    next_json(&mut a).await;

    b.close(None).await.unwrap();
    drop(b);

    let roster = next_json(&mut a).await;
    assert_eq!(roster["type"], "activeUsers");
    assert_eq!(roster["data"].as_array().unwrap().len(), 1);
    assert_eq!(roster["data"][0]["email"], "a@example.com");
}

#[tokio::test]
async fn test_rejects_missing_and_unknown_tokens() {
    let server = TestServer::start().await;

    for query in ["", "?token=", "?token=nope"] {
        let url = format!("ws://{}/api/ws{}", server.addr, query);
        match connect_async(url).await {
            Err(WsError::Http(res)) => assert_eq!(res.status(), 401),
            Err(e) => panic!("expected 401, got {e}"),
            Ok(_) => panic!("expected 401, connection was accepted"),
        }
    }

    let res = reqwest::get(server.url("/api/sse?token=nope")).await.unwrap();
    assert_eq!(res.status(), 401);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    assert_eq!(server.stats().await["activeConnections"], 0);
}

#[tokio::test]
async fn test_control_upload_reaches_clients() {
    let server = TestServer::start().await;

    let mut a = server.ws("token-a").await;
    next_json(&mut a).await;
    next_json(&mut a).await;

    let res = reqwest::Client::new()
        .post(server.url("/api/control/messages"))
        .header(API_KEY_HEADER, KEY)
        .json(&json!({
            "messages": [{
                "phone_id": "p1",
                "phone_number": "+8613800000000",
                "content": "Your code is 204816"
            }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let event = next_json(&mut a).await;
    assert_eq!(event["type"], "messages:bulk_created");
    assert_eq!(event["data"][0]["verification_code"], "204816");
    assert!(event["timestamp"].is_string());
    assert_eq!(server.records.messages().len(), 1);

    let res: Value = reqwest::Client::new()
        .post(server.url("/api/realtime/broadcast"))
        .header(API_KEY_HEADER, KEY)
        .json(&json!({"type": "phones:updated", "data": []}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res, json!({"success": true, "recipients": 1}));
    assert_eq!(next_json(&mut a).await["type"], "phones:updated");
}

#[tokio::test]
async fn test_sse_stream() {
    let server = TestServer::start().await;

    let res = reqwest::get(server.url("/api/sse?token=token-a")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-accel-buffering"], "no");
    assert!(res.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = res.bytes_stream();
    let mut seen = String::new();
    while !seen.contains("event: heartbeat") {
        let chunk = timeout(Duration::from_secs(5), body.next())
            .await
            .expect("timed out waiting for SSE data")
            .expect("stream ended")
            .unwrap();
        seen.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    assert!(seen.contains("event: connected"));
    assert!(seen.contains("event: activeUsers"));
    assert_eq!(server.stats().await["sseConnections"], 1);

    drop(body);

    // The next heartbeat write fails and the stream's guard deregisters it
    let mut remaining = Value::Null;
    for _ in 0..50 {
        remaining = server.stats().await["activeConnections"].clone();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(remaining, 0);
}
