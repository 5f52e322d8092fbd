//! WebSocket handler for Axum
//!
//! Authenticates the connect token, upgrades, and then bridges the socket to
//! the room: inbound text goes to the room, outbound frames and ping
//! heartbeats go to the socket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use smsdash_shared::Identity;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::auth::resolve_identity;
use crate::error::ApiError;
use crate::state::AppState;

use super::connection::{Frame, TransportKind};
use super::room::RoomHandle;

/// Query string accepted by both realtime transports
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket.
/// The token is checked before the upgrade so rejected clients get a plain 401.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let identity = resolve_identity(state.sessions.as_ref(), query.token.as_deref()).await?;

    let Some(ws) = ws else {
        return Err(ApiError::BadRequest(
            "Expected a WebSocket upgrade request".to_string(),
        ));
    };

    tracing::info!(user = %identity.email, "WebSocket connection upgrade requested");

    let room = state.room.clone();
    let ping_every = state.heartbeat.ws;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, identity, room, ping_every))
        .into_response())
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Identity, room: RoomHandle, ping_every: Duration) {
    let (mut sender, mut receiver) = socket.split();

    // Channel the room writes this connection's frames into
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let session_id = match room.accept(identity, TransportKind::WebSocket, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Rejecting WebSocket: room unavailable");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Writer: queued frames plus protocol-level pings
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = interval_at(Instant::now() + ping_every, ping_every);
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.data.to_string())).await.is_err() {
                            break; // Connection closed
                        }
                    }
                    None => {
                        // Removed from the room
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: control messages go to the room in arrival order
    let inbound_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = inbound_room.inbound(session_id, text) {
                        tracing::warn!(session_id = %session_id, error = %e, "Dropping inbound message");
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(session_id = %session_id, "WebSocket close frame received");
                    break;
                }
                Ok(_) => {} // Axum answers pings; binary frames are ignored
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(session_id = %session_id, "WebSocket connection closing");
    if let Err(e) = room.remove(session_id) {
        tracing::warn!(session_id = %session_id, error = %e, "Failed to deregister WebSocket connection");
    }
}
