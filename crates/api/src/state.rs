//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ControlKey, SessionStore};
use crate::config::Config;
use crate::ingest::RecordStore;
use crate::realtime::{Broadcaster, RoomGateway, RoomHandle};

/// Keep-alive cadence for each realtime transport
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSettings {
    pub sse: Duration,
    pub ws: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            sse: Duration::from_secs(30),
            ws: Duration::from_secs(30),
        }
    }
}

/// State handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub records: Arc<dyn RecordStore>,
    pub room: RoomHandle,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub control_key: ControlKey,
    pub heartbeat: HeartbeatSettings,
}

impl AppState {
    /// Wire state around an already running room; broadcasts go through that room
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        records: Arc<dyn RecordStore>,
        room: RoomHandle,
        control_key: ControlKey,
        heartbeat: HeartbeatSettings,
    ) -> Self {
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(RoomGateway::new(room.clone()));
        Self {
            sessions,
            records,
            room,
            broadcaster,
            control_key,
            heartbeat,
        }
    }

    pub fn from_config(
        config: &Config,
        sessions: Arc<dyn SessionStore>,
        records: Arc<dyn RecordStore>,
        room: RoomHandle,
    ) -> Self {
        Self::new(
            sessions,
            records,
            room,
            ControlKey::new(&config.control_api_key),
            HeartbeatSettings {
                sse: config.sse_heartbeat,
                ws: config.ws_heartbeat,
            },
        )
    }

    /// Replace the broadcaster, e.g. with a recording one in tests
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }
}
