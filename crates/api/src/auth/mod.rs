//! Authentication for realtime clients and the control server

pub mod api_key;
pub mod session;

pub use api_key::{require_control_key, ControlKey, API_KEY_HEADER};
pub use session::{MemorySessionStore, RedisSessionStore, SessionStore, SessionStoreError};

use smsdash_shared::Identity;

use crate::error::ApiError;

/// Resolve the `token` query parameter of a realtime request.
///
/// Runs before any upgrade so a rejected client never gets a connection.
pub async fn resolve_identity(
    store: &dyn SessionStore,
    token: Option<&str>,
) -> Result<Identity, ApiError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => {
            tracing::warn!("Realtime auth failed: missing token");
            return Err(ApiError::Unauthorized);
        }
    };

    match store.resolve(token).await? {
        Some(identity) => Ok(identity),
        None => {
            tracing::warn!("Realtime auth failed: invalid session");
            Err(ApiError::InvalidToken)
        }
    }
}
