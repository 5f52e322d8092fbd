//! Session store lookups
//!
//! The login flow (outside this service) writes one JSON record per session
//! token into a key-value store. Realtime transports only ever read it to
//! turn the `token` query parameter into an [`Identity`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use smsdash_shared::{Identity, SessionRecord};
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Connection attempts made against the store at startup
const CONNECT_RETRIES: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session store error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Read-only view of the session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve a token to its identity. Unknown, expired and unreadable
    /// sessions all resolve to `None`.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionStoreError>;
}

/// Decode a stored record, discarding it if expired or unreadable
fn decode_record(token_hint: &str, raw: &str) -> Option<Identity> {
    let record: SessionRecord = match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(token = %token_hint, error = %e, "Unreadable session record");
            return None;
        }
    };

    if record.is_expired_at(OffsetDateTime::now_utc()) {
        tracing::debug!(token = %token_hint, "Session expired");
        return None;
    }

    Some(record.user)
}

/// Short, log-safe prefix of a token
fn token_hint(token: &str) -> String {
    token.chars().take(6).collect::<String>() + "..."
}

/// Redis-backed session store
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: ConnectionManager,
    key_prefix: String,
}

impl RedisSessionStore {
    /// Connect with exponential backoff so a slow Redis doesn't fail startup
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(redis_url)?;

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(CONNECT_RETRIES)
            .map(jitter);

        let manager = Retry::spawn(strategy, || {
            let client = client.clone();
            async move {
                ConnectionManager::new(client).await.map_err(|e| {
                    tracing::warn!(error = %e, "Session store connection failed - will retry");
                    e
                })
            }
        })
        .await?;

        tracing::info!("Connected to session store");

        Ok(Self {
            manager,
            key_prefix: key_prefix.to_string(),
        })
    }

}

/// Store key for `token`; an empty prefix keys sessions by the raw token
fn session_key(prefix: &str, token: &str) -> String {
    format!("{prefix}{token}")
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionStoreError> {
        if token.is_empty() {
            return Ok(None);
        }

        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(session_key(&self.key_prefix, token)).await?;

        Ok(raw.and_then(|raw| decode_record(&token_hint(token), &raw)))
    }
}

/// In-process session store for local development and tests
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a non-expiring session for `identity`
    pub fn insert(&self, token: &str, identity: Identity) {
        self.insert_record(
            token,
            &SessionRecord {
                user: identity,
                expires: None,
            },
        );
    }

    pub fn insert_record(&self, token: &str, record: &SessionRecord) {
        match serde_json::to_string(record) {
            Ok(raw) => self.insert_raw(token, raw),
            Err(e) => tracing::error!(error = %e, "Failed to encode session record"),
        }
    }

    /// Store raw bytes as-is, as another writer of the store might
    pub fn insert_raw(&self, token: &str, raw: String) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(token.to_string(), raw);
        }
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(token);
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, SessionStoreError> {
        let raw = match self.sessions.read() {
            Ok(sessions) => sessions.get(token).cloned(),
            Err(_) => None,
        };

        Ok(raw.and_then(|raw| decode_record(&token_hint(token), &raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: "auth0|7".to_string(),
            email: "ops@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_resolves_known_token() {
        let store = MemorySessionStore::new();
        store.insert("tok-1", identity());

        assert_eq!(store.resolve("tok-1").await.unwrap(), Some(identity()));
        assert_eq!(store.resolve("tok-2").await.unwrap(), None);

        store.revoke("tok-1");
        assert_eq!(store.resolve("tok-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = MemorySessionStore::new();
        store.insert_record(
            "old",
            &SessionRecord {
                user: identity(),
                expires: Some(1_000),
            },
        );

        assert_eq!(store.resolve("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_session_is_rejected() {
        let store = MemorySessionStore::new();
        store.insert_raw("junk", "{\"user\":42}".to_string());

        assert_eq!(store.resolve("junk").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_session_record_wire_format() {
        let store = MemorySessionStore::new();
        store.insert_raw(
            "tok",
            r#"{"user":{"id":"auth0|7","email":"ops@example.com","name":"Ops"},"expires":99999999999999}"#
                .to_string(),
        );

        assert_eq!(store.resolve("tok").await.unwrap(), Some(identity()));
    }

    #[test]
    fn test_session_key_uses_raw_token_without_prefix() {
        assert_eq!(session_key("", "abc123"), "abc123");
        assert_eq!(session_key("session:", "abc123"), "session:abc123");
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_store() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let store = RedisSessionStore::connect(&url, "").await.unwrap();
        assert_eq!(store.resolve("definitely-not-a-token").await.unwrap(), None);
    }
}
