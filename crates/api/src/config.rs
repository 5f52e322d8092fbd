//! Application configuration

use std::env;
use std::time::Duration;

/// Minimum length of the shared control API key
const MIN_CONTROL_KEY_LEN: usize = 32;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origin: Option<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Session store
    pub redis_url: String,
    pub session_key_prefix: String,

    // Control server
    pub control_api_key: String,

    // Realtime
    pub sse_heartbeat: Duration,
    pub ws_heartbeat: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").ok().filter(|s| !s.is_empty()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            // Session store
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            session_key_prefix: env::var("SESSION_KEY_PREFIX").unwrap_or_default(),

            // Control server
            control_api_key: {
                let key = env::var("CONTROL_API_KEY")
                    .map_err(|_| ConfigError::Missing("CONTROL_API_KEY"))?;
                if key.len() < MIN_CONTROL_KEY_LEN {
                    return Err(ConfigError::WeakSecret(
                        "CONTROL_API_KEY must be at least 32 characters",
                    ));
                }
                key
            },

            // Realtime
            sse_heartbeat: heartbeat_from_env("SSE_HEARTBEAT_SECS")?,
            ws_heartbeat: heartbeat_from_env("WS_HEARTBEAT_SECS")?,
        })
    }
}

/// Heartbeat interval in whole seconds, defaulting to 30
fn heartbeat_from_env(name: &'static str) -> Result<Duration, ConfigError> {
    let secs = match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(name, "must be a whole number of seconds"))?,
        Err(_) => 30,
    };

    if secs == 0 {
        return Err(ConfigError::Invalid(name, "must be greater than zero"));
    }

    Ok(Duration::from_secs(secs))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
