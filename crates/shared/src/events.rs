//! Realtime wire types
//!
//! Control messages sent by clients over the WebSocket transport and the
//! envelopes the server pushes over either transport. Every outbound frame
//! is a JSON object carrying a `type` tag, so clients dispatch WebSocket and
//! SSE traffic the same way.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Channels a connection is subscribed to until it says otherwise
pub const DEFAULT_CHANNELS: [&str; 2] = ["messages", "phones"];

/// Broadcast type for a batch of newly ingested SMS messages
pub const EVENT_MESSAGES_BULK_CREATED: &str = "messages:bulk_created";

/// Broadcast type for phone status changes
pub const EVENT_PHONES_UPDATED: &str = "phones:updated";

/// Owned copy of [`DEFAULT_CHANNELS`]
pub fn default_channels() -> Vec<String> {
    DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect()
}

// =============================================================================
// Client-to-Server Messages
// =============================================================================

/// Control messages accepted on the bidirectional transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Liveness probe, answered with `pong`
    Ping,

    /// Replace the connection's channel set; `None` restores the defaults
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channels: Option<Vec<String>>,
    },
}

impl ClientMessage {
    /// Parse an inbound text frame.
    ///
    /// Distinguishes a frame that is not a well-formed control message from
    /// one that is well-formed JSON with a `type` the server does not know.
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| InboundError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| InboundError::Malformed("missing string field `type`".to_string()))?;

        match kind.as_str() {
            "ping" | "subscribe" => {
                serde_json::from_value(value).map_err(|e| InboundError::Malformed(e.to_string()))
            }
            _ => Err(InboundError::UnknownType(kind)),
        }
    }
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl InboundError {
    /// Text sent back to the client in the `error` envelope
    pub fn reply_message(&self) -> &'static str {
        match self {
            InboundError::Malformed(_) => "Invalid message format",
            InboundError::UnknownType(_) => "Unknown message type",
        }
    }
}

// =============================================================================
// Server-to-Client Messages
// =============================================================================

/// Control envelopes produced by the room itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every new connection
    Connected {
        session_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    /// Reply to `ping`
    Pong {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    /// Reply to `subscribe`
    Subscribed { channels: Vec<String> },

    /// Rejected inbound frame
    Error { message: String },

    /// Presence roster, sent to everyone after each connect/disconnect
    ActiveUsers { data: Vec<ActiveUser> },

    /// Keep-alive for the one-way stream transport
    Heartbeat {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

impl ServerMessage {
    /// Value of the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Subscribed { .. } => "subscribed",
            ServerMessage::Error { .. } => "error",
            ServerMessage::ActiveUsers { .. } => "activeUsers",
            ServerMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// One roster entry of the `activeUsers` presence event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUser {
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
}

/// Event pushed by an external collaborator through the broadcast gateway.
///
/// Never persisted; the timestamp is assigned when the broadcast happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
