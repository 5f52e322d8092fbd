//! Control API key validation
//!
//! The control server (the SMS gateway box) authenticates every upload with a
//! shared secret in the `X-API-Key` header.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// Header carrying the control API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret for control and internal broadcast routes
#[derive(Clone)]
pub struct ControlKey {
    key: Arc<str>,
}

impl ControlKey {
    pub fn new(key: &str) -> Self {
        Self { key: Arc::from(key) }
    }

    /// Check a presented key; a missing key never matches
    pub fn verify(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(presented) => constant_time_compare(presented, &self.key),
            None => false,
        }
    }
}

impl std::fmt::Debug for ControlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ControlKey(..)")
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    // Even when lengths differ, we do constant-time work to avoid leaking length
    if a.len() != b.len() {
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Middleware rejecting requests without a valid `X-API-Key`
pub async fn require_control_key(
    State(key): State<ControlKey>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !key.verify(presented) {
        tracing::warn!(
            path = %request.uri().path(),
            key_present = presented.is_some(),
            "Rejected control request: invalid API key"
        );
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
