//! Common types used across the SMS dashboard

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// Identity
// =============================================================================

/// Authenticated principal bound to a realtime connection.
///
/// Resolved once from the session store when a transport is opened and never
/// changed for the lifetime of that connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity-provider subject (e.g. `auth0|64f...`)
    pub id: String,
    pub email: String,
}

/// Session record as written to the key-value session store by the login flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user: Identity,
    /// Expiry as Unix epoch milliseconds; sessions without one never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

impl SessionRecord {
    /// Whether the session has expired relative to `now`
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        match self.expires {
            Some(expires_ms) => {
                let now_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;
                expires_ms < now_ms
            }
            None => false,
        }
    }
}

// =============================================================================
// SMS Records
// =============================================================================

/// Message as uploaded by the control server
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub phone_id: String,
    pub phone_number: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

/// Stored message, also the payload of `messages:bulk_created` broadcasts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsMessage {
    pub id: String,
    pub phone_id: String,
    pub phone_number: String,
    pub content: String,
    pub source: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub verification_code: Option<String>,
}

/// Direction of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Received,
    Sent,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Received => "received",
            MessageKind::Sent => "sent",
        }
    }
}

/// Phone modem status as reported by the control server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneStatus {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    pub status: String,
    #[serde(default)]
    pub signal: Option<i32>,
    #[serde(default)]
    pub iccid: Option<String>,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub rsrq: Option<f64>,
    #[serde(default)]
    pub rsrp: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
}
