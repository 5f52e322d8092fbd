//! Room coordinator
//!
//! The room is the single broadcast domain for every realtime client. It runs
//! as one tokio task that owns the registry, so accepts, removals, inbound
//! control messages and fan-outs are applied strictly one at a time. Other
//! components talk to it through a cloneable [`RoomHandle`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use smsdash_shared::{
    default_channels, ActiveUser, BroadcastEvent, ClientMessage, Identity, ServerMessage,
};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::connection::{Connection, Frame, FrameSender, TransportKind};
use super::registry::{MemoryRegistry, Registry};

/// Name of the one room every connection joins
pub const GLOBAL_ROOM: &str = "global";

/// The broadcast domain and its connection registry
pub struct Room<R: Registry = MemoryRegistry> {
    name: Arc<str>,
    registry: R,
}

impl Room<MemoryRegistry> {
    /// The global room backed by an in-process registry
    pub fn global() -> Self {
        Self::new(GLOBAL_ROOM, MemoryRegistry::new())
    }
}

impl<R: Registry> Room<R> {
    pub fn new(name: &str, registry: R) -> Self {
        Self {
            name: Arc::from(name),
            registry,
        }
    }

    /// Register a connection, greet it, and announce the new roster
    pub fn accept_connection(
        &mut self,
        identity: Identity,
        transport: TransportKind,
        sender: FrameSender,
    ) -> Uuid {
        let conn = Connection::new(identity, transport, sender);
        let session_id = conn.session_id;

        let hello = ServerMessage::Connected {
            session_id,
            timestamp: OffsetDateTime::now_utc(),
        };
        if let Err(e) = conn.send_message(&hello) {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to send connected message");
        }

        tracing::info!(
            room = %self.name,
            session_id = %session_id,
            user = %conn.identity.email,
            transport = %transport,
            "Realtime connection accepted"
        );

        self.registry.insert(conn);
        self.broadcast_presence();

        session_id
    }

    /// Dispatch one inbound control frame from `session_id`.
    ///
    /// Replies go to the originating connection only. Frames for sessions
    /// that are no longer registered are dropped.
    pub fn handle_inbound(&mut self, session_id: &Uuid, text: &str) {
        let Some(conn) = self.registry.get_mut(session_id) else {
            tracing::debug!(session_id = %session_id, "Inbound message for unknown session");
            return;
        };

        let reply = match ClientMessage::parse(text) {
            Ok(ClientMessage::Ping) => ServerMessage::Pong {
                timestamp: OffsetDateTime::now_utc(),
            },
            Ok(ClientMessage::Subscribe { channels }) => {
                let channels = conn.set_subscriptions(channels.unwrap_or_else(default_channels));
                ServerMessage::Subscribed { channels }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Rejected inbound message");
                ServerMessage::error(e.reply_message())
            }
        };

        if let Err(e) = conn.send_message(&reply) {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to reply to inbound message");
        }
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn remove_connection(&mut self, session_id: &Uuid) -> bool {
        match self.registry.remove(session_id) {
            Some(conn) => {
                tracing::info!(
                    room = %self.name,
                    session_id = %session_id,
                    user = %conn.identity.email,
                    remaining_connections = self.registry.len(),
                    "Realtime connection removed"
                );
                self.broadcast_presence();
                true
            }
            None => false,
        }
    }

    /// Send an event to every registered connection.
    ///
    /// Returns the number of recipients attempted, including those whose
    /// transport turned out to be closed.
    pub fn broadcast(&self, event_type: &str, data: Value) -> usize {
        let event = BroadcastEvent::new(event_type, data);
        match Frame::from_event(&event) {
            Ok(frame) => self.fan_out(frame),
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "Failed to serialize broadcast event");
                0
            }
        }
    }

    /// Send the current roster to every connection as `activeUsers`
    pub fn broadcast_presence(&self) -> usize {
        let message = ServerMessage::ActiveUsers { data: self.roster() };
        match Frame::from_message(&message) {
            Ok(frame) => self.fan_out(frame),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize presence roster");
                0
            }
        }
    }

    /// Identity and connect time of every connection, oldest first
    pub fn roster(&self) -> Vec<ActiveUser> {
        let mut users: Vec<ActiveUser> = self
            .registry
            .connections()
            .map(Connection::active_user)
            .collect();
        users.sort_by_key(|u| u.connected_at);
        users
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> RoomStats {
        let websocket = self
            .registry
            .connections()
            .filter(|c| c.transport == TransportKind::WebSocket)
            .count();
        let total = self.registry.len();

        RoomStats {
            room: self.name.to_string(),
            active_connections: total,
            websocket_connections: websocket,
            sse_connections: total - websocket,
        }
    }

    fn fan_out(&self, frame: Frame) -> usize {
        let mut attempted = 0;
        let mut failed = 0;

        for conn in self.registry.connections() {
            attempted += 1;
            if let Err(e) = conn.send(frame.clone()) {
                failed += 1;
                tracing::warn!(
                    session_id = %conn.session_id,
                    error = %e,
                    "Failed to send event to connection (likely closed)"
                );
            }
        }

        tracing::debug!(
            room = %self.name,
            event_type = %frame.event,
            recipients = attempted,
            failed = failed,
            "Broadcast event to room"
        );

        attempted
    }

    fn apply(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Accept {
                identity,
                transport,
                sender,
                reply,
            } => {
                let session_id = self.accept_connection(identity, transport, sender);
                if reply.send(session_id).is_err() {
                    // The transport gave up while waiting; don't leave it registered
                    self.remove_connection(&session_id);
                }
            }
            RoomCommand::Inbound { session_id, text } => self.handle_inbound(&session_id, &text),
            RoomCommand::Remove { session_id } => {
                self.remove_connection(&session_id);
            }
            RoomCommand::Broadcast {
                event_type,
                data,
                reply,
            } => {
                let _ = reply.send(self.broadcast(&event_type, data));
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        tracing::info!(room = %self.name, "Room started");
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        tracing::info!(room = %self.name, "Room stopped");
    }

    /// Move the room onto its own task and return the handle that drives it
    pub fn spawn(self) -> RoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = Arc::clone(&self.name);
        tokio::spawn(self.run(rx));
        RoomHandle { name, tx }
    }
}

/// Snapshot of room membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room: String,
    pub active_connections: usize,
    pub websocket_connections: usize,
    pub sse_connections: usize,
}

/// Requests processed by the room task
#[derive(Debug)]
pub enum RoomCommand {
    Accept {
        identity: Identity,
        transport: TransportKind,
        sender: FrameSender,
        reply: oneshot::Sender<Uuid>,
    },
    Inbound {
        session_id: Uuid,
        text: String,
    },
    Remove {
        session_id: Uuid,
    },
    Broadcast {
        event_type: String,
        data: Value,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} is unavailable")]
    Unavailable(String),
}

/// Cloneable front door to a running room
#[derive(Clone, Debug)]
pub struct RoomHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the room task is still consuming commands
    pub fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    fn submit(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx
            .send(command)
            .map_err(|_| RoomError::Unavailable(self.name.to_string()))
    }

    /// Register a connection and return its session ID
    pub async fn accept(
        &self,
        identity: Identity,
        transport: TransportKind,
        sender: FrameSender,
    ) -> Result<Uuid, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Accept {
            identity,
            transport,
            sender,
            reply,
        })?;
        rx.await
            .map_err(|_| RoomError::Unavailable(self.name.to_string()))
    }

    /// Queue an inbound control frame for `session_id`
    pub fn inbound(&self, session_id: Uuid, text: String) -> Result<(), RoomError> {
        self.submit(RoomCommand::Inbound { session_id, text })
    }

    /// Queue removal of `session_id`. Safe to call from `Drop`.
    pub fn remove(&self, session_id: Uuid) -> Result<(), RoomError> {
        self.submit(RoomCommand::Remove { session_id })
    }

    /// Fan an event out to every connection, returning the recipients attempted
    pub async fn broadcast(
        &self,
        event_type: impl Into<String>,
        data: Value,
    ) -> Result<usize, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Broadcast {
            event_type: event_type.into(),
            data,
            reply,
        })?;
        rx.await
            .map_err(|_| RoomError::Unavailable(self.name.to_string()))
    }

    pub async fn stats(&self) -> Result<RoomStats, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.submit(RoomCommand::Stats { reply })?;
        rx.await
            .map_err(|_| RoomError::Unavailable(self.name.to_string()))
    }

    /// A handle whose room has already stopped
    #[cfg(test)]
    pub(crate) fn closed(name: &str) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            name: Arc::from(name),
            tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Rx = mpsc::UnboundedReceiver<Frame>;

    fn identity(email: &str) -> Identity {
        Identity {
            id: format!("auth0|{email}"),
            email: email.to_string(),
        }
    }

    fn join(room: &mut Room, email: &str) -> (Uuid, Rx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = room.accept_connection(identity(email), TransportKind::WebSocket, tx);
        (id, rx)
    }

    fn next(rx: &mut Rx) -> Value {
        let frame = rx.try_recv().expect("expected a frame");
        serde_json::from_str(&frame.data).unwrap()
    }

    fn drain(rx: &mut Rx) {
        while rx.try_recv().is_ok() {}
    }

    #[test]
    fn test_accept_sends_connected_then_presence() {
        let mut room = Room::global();
        let (a, mut rx_a) = join(&mut room, "a@example.com");

        let hello = next(&mut rx_a);
        assert_eq!(hello["type"], "connected");
        assert_eq!(hello["sessionId"], a.to_string());
        assert!(hello["timestamp"].is_string());

        let presence = next(&mut rx_a);
        assert_eq!(presence["type"], "activeUsers");
        assert_eq!(presence["data"].as_array().unwrap().len(), 1);

        let (_b, mut rx_b) = join(&mut room, "b@example.com");
        let presence = next(&mut rx_a);
        assert_eq!(presence["type"], "activeUsers");
        assert_eq!(presence["data"].as_array().unwrap().len(), 2);

        assert_eq!(next(&mut rx_b)["type"], "connected");
        assert_eq!(next(&mut rx_b)["data"].as_array().unwrap().len(), 2);
        assert_eq!(room.connection_count(), 2);
    }

    #[test]
    fn test_ping_replies_only_to_sender() {
        let mut room = Room::global();
        let (a, mut rx_a) = join(&mut room, "a@example.com");
        let (_b, mut rx_b) = join(&mut room, "b@example.com");
        drain(&mut rx_a);
        drain(&mut rx_b);

        room.handle_inbound(&a, r#"{"type":"ping"}"#);

        let pong = next(&mut rx_a);
        assert_eq!(pong["type"], "pong");
        assert!(pong["timestamp"].is_string());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_replaces_channel_set() {
        let mut room = Room::global();
        let (a, mut rx_a) = join(&mut room, "a@example.com");
        drain(&mut rx_a);

        room.handle_inbound(&a, r#"{"type":"subscribe","channels":["messages"]}"#);
        assert_eq!(next(&mut rx_a)["channels"], json!(["messages"]));

        room.handle_inbound(&a, r#"{"type":"subscribe","channels":["phones"]}"#);
        let reply = next(&mut rx_a);
        assert_eq!(reply["type"], "subscribed");
        assert_eq!(reply["channels"], json!(["phones"]));

        let conn = room.registry.get(&a).unwrap();
        assert!(conn.is_subscribed("phones"));
        assert!(!conn.is_subscribed("messages"));
    }

    #[test]
    fn test_subscribe_without_channels_restores_defaults() {
        let mut room = Room::global();
        let (a, mut rx_a) = join(&mut room, "a@example.com");
        drain(&mut rx_a);

        room.handle_inbound(&a, r#"{"type":"subscribe","channels":[]}"#);
        assert_eq!(next(&mut rx_a)["channels"], json!([]));

        room.handle_inbound(&a, r#"{"type":"subscribe"}"#);
        assert_eq!(next(&mut rx_a)["channels"], json!(["messages", "phones"]));
    }

    #[test]
    fn test_bad_frames_report_errors_without_mutating_state() {
        let mut room = Room::global();
        let (a, mut rx_a) = join(&mut room, "a@example.com");
        drain(&mut rx_a);

        room.handle_inbound(&a, r#"{"type":"typing"}"#);
        let reply = next(&mut rx_a);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Unknown message type");

        room.handle_inbound(&a, "{not json");
        let reply = next(&mut rx_a);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Invalid message format");

        room.handle_inbound(&a, r#"{"type":"subscribe","channels":"phones"}"#);
        assert_eq!(next(&mut rx_a)["type"], "error");

        let conn = room.registry.get(&a).unwrap();
        assert!(conn.is_subscribed("messages"));
        assert!(conn.is_subscribed("phones"));
        assert_eq!(room.connection_count(), 1);
    }

    #[test]
    fn test_inbound_for_unknown_session_is_ignored() {
        let mut room = Room::global();
        let (_a, mut rx_a) = join(&mut room, "a@example.com");
        drain(&mut rx_a);

        room.handle_inbound(&Uuid::new_v4(), r#"{"type":"ping"}"#);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_counts_attempts_despite_failures() {
        let mut room = Room::global();
        let (_a, mut rx_a) = join(&mut room, "a@example.com");
        let (_b, rx_b) = join(&mut room, "b@example.com");
        let (_c, mut rx_c) = join(&mut room, "c@example.com");
        drain(&mut rx_a);
        drain(&mut rx_c);
        drop(rx_b);

        let recipients = room.broadcast("phones:updated", json!([{"id": "p1"}]));
        assert_eq!(recipients, 3);

        for rx in [&mut rx_a, &mut rx_c] {
            let event = next(rx);
            assert_eq!(event["type"], "phones:updated");
            assert_eq!(event["data"][0]["id"], "p1");
            assert!(event["timestamp"].is_string());
        }
    }

    #[test]
    fn test_broadcast_to_empty_room() {
        let room = Room::global();
        assert_eq!(room.broadcast("messages:bulk_created", json!([])), 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut room = Room::global();
        let (a, _rx_a) = join(&mut room, "a@example.com");
        let (_b, mut rx_b) = join(&mut room, "b@example.com");
        drain(&mut rx_b);

        assert!(room.remove_connection(&a));
        let presence = next(&mut rx_b);
        assert_eq!(presence["type"], "activeUsers");
        assert_eq!(presence["data"][0]["email"], "b@example.com");

        assert!(!room.remove_connection(&a));
        assert!(rx_b.try_recv().is_err(), "no presence update for a no-op removal");
        assert_eq!(room.connection_count(), 1);
    }

    #[test]
    fn test_stats_by_transport() {
        let mut room = Room::global();
        join(&mut room, "a@example.com");
        let (tx, _rx) = mpsc::unbounded_channel();
        room.accept_connection(identity("b@example.com"), TransportKind::Sse, tx);

        let stats = room.stats();
        assert_eq!(stats.room, GLOBAL_ROOM);
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.websocket_connections, 1);
        assert_eq!(stats.sse_connections, 1);
    }

    #[tokio::test]
    async fn test_handle_drives_room_task() {
        let handle = Room::global().spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let session_id = handle
            .accept(identity("a@example.com"), TransportKind::WebSocket, tx)
            .await
            .unwrap();

        let hello: Value = serde_json::from_str(&rx.recv().await.unwrap().data).unwrap();
        assert_eq!(hello["sessionId"], session_id.to_string());

        handle.inbound(session_id, r#"{"type":"ping"}"#.to_string()).unwrap();
        assert_eq!(handle.broadcast("phones:updated", json!([])).await.unwrap(), 1);

        let _presence = rx.recv().await.unwrap();
        let pong: Value = serde_json::from_str(&rx.recv().await.unwrap().data).unwrap();
        assert_eq!(pong["type"], "pong");
        let event: Value = serde_json::from_str(&rx.recv().await.unwrap().data).unwrap();
        assert_eq!(event["type"], "phones:updated");

        handle.remove(session_id).unwrap();
        assert_eq!(handle.stats().await.unwrap().active_connections, 0);
    }

    #[tokio::test]
    async fn test_closed_handle_reports_unavailable() {
        let handle = RoomHandle::closed(GLOBAL_ROOM);
        assert!(!handle.is_available());
        assert_eq!(
            handle.broadcast("phones:updated", json!([])).await,
            Err(RoomError::Unavailable(GLOBAL_ROOM.to_string()))
        );
    }
}
