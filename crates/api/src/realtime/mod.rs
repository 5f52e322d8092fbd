//! Realtime fan-out for the dashboard
//!
//! Pushes new messages, phone status changes and presence to every connected
//! dashboard over WebSocket, or over SSE when a socket can't be held open.
//!
//! # Architecture
//!
//! - **Connection**: one authenticated client attachment and its outbound channel
//! - **Registry**: storage for live connections, owned by the room
//! - **Room**: the single broadcast domain, run as one task behind a [`RoomHandle`]
//! - **Handler / SSE**: Axum transports that bridge sockets and streams to the room
//! - **Gateway**: the [`Broadcaster`] ingestion uses to publish events

pub mod connection;
pub mod gateway;
pub mod handler;
pub mod registry;
pub mod room;
pub mod sse;

pub use connection::{Frame, TransportKind};
pub use gateway::{Broadcaster, PublishOutcome, RoomGateway};
pub use handler::ws_handler;
pub use registry::{MemoryRegistry, Registry};
pub use room::{Room, RoomError, RoomHandle, RoomStats, GLOBAL_ROOM};
pub use sse::sse_handler;
