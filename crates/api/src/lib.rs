//! SMS Dashboard API Library
//!
//! This crate contains the API server components: the realtime room and its
//! transports, control server ingestion, and health endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod realtime;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::{cors_layer, create_router};
pub use state::{AppState, HeartbeatSettings};
