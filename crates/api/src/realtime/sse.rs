//! Server-Sent Events transport
//!
//! The one-way fallback for clients that cannot hold a WebSocket. Every
//! outbound frame becomes one SSE event named after its `type`, and a JSON
//! heartbeat keeps intermediaries from closing idle streams. The stream owns
//! its heartbeat timer and a guard that deregisters the session, so dropping
//! the response body is enough to clean up.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use smsdash_shared::ServerMessage;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::auth::resolve_identity;
use crate::error::ApiError;
use crate::state::AppState;

use super::connection::{Frame, TransportKind};
use super::handler::TokenQuery;
use super::room::RoomHandle;

/// Removes the session from the room when the stream is dropped
struct SessionGuard {
    room: RoomHandle,
    session_id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!(session_id = %self.session_id, "SSE stream closed");
        if let Err(e) = self.room.remove(self.session_id) {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to deregister SSE connection");
        }
    }
}

fn heartbeat_frame() -> Option<Frame> {
    let beat = ServerMessage::Heartbeat {
        timestamp: OffsetDateTime::now_utc(),
    };
    match Frame::from_message(&beat) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize SSE heartbeat");
            None
        }
    }
}

/// Outbound frames for one SSE client, interleaved with heartbeats.
///
/// The stream ends when the room drops the frame sender, and deregisters
/// the session when it is dropped.
pub fn session_stream(
    frames: mpsc::UnboundedReceiver<Frame>,
    heartbeat_every: Duration,
    room: RoomHandle,
    session_id: Uuid,
) -> impl Stream<Item = Frame> + Send + 'static {
    let guard = SessionGuard { room, session_id };

    let mut ticker = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeats = IntervalStream::new(ticker)
        .filter_map(|_| heartbeat_frame())
        .map(Some);

    // Trailing `None` marks the frame channel closing
    let frames = UnboundedReceiverStream::new(frames)
        .map(Some)
        .chain(tokio_stream::once(None));

    frames
        .merge(heartbeats)
        .take_while(Option::is_some)
        .filter_map(move |frame| {
            let _guard = &guard;
            frame
        })
}

fn to_event(frame: Frame) -> Result<Event, Infallible> {
    Ok(Event::default().event(&*frame.event).data(&*frame.data))
}

/// SSE handler - authenticates the token and opens the event stream
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let identity = resolve_identity(state.sessions.as_ref(), query.token.as_deref()).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = state
        .room
        .accept(identity, TransportKind::Sse, tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Rejecting SSE stream: room unavailable");
            ApiError::ServiceUnavailable
        })?;

    let session = session_stream(rx, state.heartbeat.sse, state.room.clone(), session_id);

    Ok((
        [("x-accel-buffering", "no")],
        Sse::new(session.map(to_event)),
    )
        .into_response())
}
