//! Client error types

use std::time::Duration;

/// Failure opening or running a realtime transport
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No session token provided")]
    MissingToken,
    #[error("Server rejected the session token")]
    Unauthorized,
    #[error("Transport did not open within {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Whether retrying with the same token is pointless
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientError::Unauthorized | ClientError::MissingToken)
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}
