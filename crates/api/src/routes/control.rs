//! Control server ingestion routes
//!
//! The control server uploads received SMS and modem status here. Records
//! are persisted first; the realtime publish afterwards is best-effort and
//! never fails the request.

use axum::{extract::State, Json};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use smsdash_shared::{
    IncomingMessage, PhoneStatus, EVENT_MESSAGES_BULK_CREATED, EVENT_PHONES_UPDATED,
};

use crate::error::{ApiError, ApiResult};
use crate::ingest::prepare_messages;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadMessagesResponse {
    pub success: bool,
    pub processed: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UpdatePhonesResponse {
    pub success: bool,
    pub updated: usize,
    pub message: String,
}

/// Pull `field` out of the body as a typed list; it must be a JSON array
fn take_list<T: DeserializeOwned>(body: Value, field: &str) -> ApiResult<Vec<T>> {
    let items = match body {
        Value::Object(mut map) => map.remove(field),
        _ => None,
    };

    match items {
        Some(items @ Value::Array(_)) => serde_json::from_value(items)
            .map_err(|e| ApiError::Validation(format!("Invalid {field} entry: {e}"))),
        _ => Err(ApiError::Validation(format!("{field} must be an array"))),
    }
}

/// POST /api/control/messages
pub async fn upload_messages(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<UploadMessagesResponse>> {
    let incoming: Vec<IncomingMessage> = take_list(body, "messages")?;
    let messages = prepare_messages(incoming);
    let processed = messages.len();

    let written = state.records.insert_messages(&messages).await?;
    tracing::info!(processed, written, "Stored uploaded messages");

    if !messages.is_empty() {
        match serde_json::to_value(&messages) {
            Ok(data) => {
                state
                    .broadcaster
                    .publish(EVENT_MESSAGES_BULK_CREATED, data)
                    .await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize messages for broadcast"),
        }
    }

    Ok(Json(UploadMessagesResponse {
        success: true,
        processed,
        message: format!("Successfully uploaded {processed} messages"),
    }))
}

/// POST /api/control/phones
pub async fn update_phones(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<UpdatePhonesResponse>> {
    let phones: Vec<PhoneStatus> = take_list(body, "phones")?;

    let stored = state.records.upsert_phones(phones).await?;
    let updated = stored.len();
    tracing::info!(updated, "Updated phone statuses");

    match serde_json::to_value(&stored) {
        Ok(data) => {
            state.broadcaster.publish(EVENT_PHONES_UPDATED, data).await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize phones for broadcast"),
    }

    Ok(Json(UpdatePhonesResponse {
        success: true,
        updated,
        message: format!("Successfully updated {updated} phones"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_list_requires_array() {
        let err = take_list::<PhoneStatus>(json!({"phones": {"id": "p1"}}), "phones").unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg == "phones must be an array"));

        let err = take_list::<PhoneStatus>(json!({}), "phones").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = take_list::<PhoneStatus>(json!([]), "phones").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_take_list_rejects_bad_entries() {
        let err = take_list::<PhoneStatus>(json!({"phones": [{"status": "online"}]}), "phones")
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg.starts_with("Invalid phones entry")));
    }

    #[test]
    fn test_take_list_parses_entries() {
        let phones: Vec<PhoneStatus> =
            take_list(json!({"phones": [{"id": "p1", "status": "online"}]}), "phones").unwrap();
        assert_eq!(phones.len(), 1);
        assert_eq!(phones[0].id, "p1");
    }
}
