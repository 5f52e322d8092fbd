//! Realtime connection state
//!
//! A [`Connection`] is one client attachment to the room: who it is, which
//! channels it listens to, and the outbound half of its transport.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use smsdash_shared::{default_channels, ActiveUser, BroadcastEvent, Identity, ServerMessage};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Which transport carries a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bidirectional socket: accepts inbound control messages
    WebSocket,
    /// One-way server push stream
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One serialized outbound message, shared between every recipient of a broadcast.
///
/// `event` is the envelope's `type` tag (used as the SSE event name) and
/// `data` the full JSON envelope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub event: Arc<str>,
    pub data: Arc<str>,
}

impl Frame {
    pub fn from_message(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: Arc::from(message.kind()),
            data: Arc::from(serde_json::to_string(message)?),
        })
    }

    pub fn from_event(event: &BroadcastEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: Arc::from(event.event_type.as_str()),
            data: Arc::from(serde_json::to_string(event)?),
        })
    }
}

/// Outbound handle owned by the registry; dropping it ends the transport writer
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Error delivering a frame to a single connection
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("transport closed")]
    Closed,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Represents an active realtime connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Identity resolved from the connect token
    pub identity: Identity,

    pub transport: TransportKind,

    pub connected_at: OffsetDateTime,

    subscriptions: BTreeSet<String>,

    sender: FrameSender,
}

impl Connection {
    /// Create a new connection subscribed to the default channels
    pub fn new(identity: Identity, transport: TransportKind, sender: FrameSender) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
            transport,
            connected_at: OffsetDateTime::now_utc(),
            subscriptions: default_channels().into_iter().collect(),
            sender,
        }
    }

    /// Queue a pre-serialized frame
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.sender.send(frame).map_err(|_| SendError::Closed)
    }

    /// Serialize and queue a control envelope
    pub fn send_message(&self, message: &ServerMessage) -> Result<(), SendError> {
        self.send(Frame::from_message(message)?)
    }

    /// Replace the channel set, returning the stored channels
    pub fn set_subscriptions(&mut self, channels: Vec<String>) -> Vec<String> {
        self.subscriptions = channels.into_iter().collect();
        tracing::debug!(
            session_id = %self.session_id,
            channels = ?self.subscriptions,
            "Replaced channel subscriptions"
        );
        self.subscriptions.iter().cloned().collect()
    }

    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    /// Presence roster entry for this connection
    pub fn active_user(&self) -> ActiveUser {
        ActiveUser {
            email: self.identity.email.clone(),
            connected_at: self.connected_at,
        }
    }
}
