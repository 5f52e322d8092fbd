//! Broadcast gateway
//!
//! What ingestion handlers use to push events to realtime clients without
//! knowing anything about connections. Publishing is best-effort: a room
//! that cannot be reached is logged and reported, never propagated as an
//! error.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::room::RoomHandle;

/// Result of one publish call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Connections the event was sent to (attempted, not acknowledged)
    pub recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn delivered(recipients: usize) -> Self {
        Self {
            recipients,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            recipients: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Sink for realtime events
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, event_type: &str, data: Value) -> PublishOutcome;
}

/// Gateway that forwards to the in-process room
#[derive(Clone)]
pub struct RoomGateway {
    room: RoomHandle,
}

impl RoomGateway {
    pub fn new(room: RoomHandle) -> Self {
        Self { room }
    }
}

#[async_trait]
impl Broadcaster for RoomGateway {
    async fn publish(&self, event_type: &str, data: Value) -> PublishOutcome {
        match self.room.broadcast(event_type, data).await {
            Ok(recipients) => {
                tracing::debug!(event_type = %event_type, recipients, "Published realtime event");
                PublishOutcome::delivered(recipients)
            }
            Err(e) => {
                tracing::error!(event_type = %event_type, error = %e, "Failed to publish realtime event");
                PublishOutcome::failed(e.to_string())
            }
        }
    }
}
