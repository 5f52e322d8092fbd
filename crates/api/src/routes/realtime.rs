//! Realtime administration routes (API-key protected)

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::realtime::RoomStats;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub success: bool,
    pub recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/realtime/broadcast
pub async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<Json<PublishResponse>> {
    if req.event_type.trim().is_empty() {
        return Err(ApiError::Validation("type is required".to_string()));
    }

    let outcome = state.broadcaster.publish(&req.event_type, req.data).await;

    Ok(Json(PublishResponse {
        success: outcome.is_ok(),
        recipients: outcome.recipients,
        error: outcome.error,
    }))
}

/// GET /api/realtime/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<RoomStats>> {
    let stats = state.room.stats().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read room stats");
        ApiError::ServiceUnavailable
    })?;
    Ok(Json(stats))
}
