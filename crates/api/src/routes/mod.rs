//! API routes

pub mod control;
pub mod health;
pub mod realtime;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::require_control_key,
    realtime::{sse_handler, ws_handler},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Realtime transports (auth handled in handler via query parameter)
    let realtime_routes = Router::new()
        .route("/ws", get(ws_handler))
        .route("/sse", get(sse_handler));

    // Control server routes (shared API key, not session tokens)
    let control_routes = Router::new()
        .route("/control/messages", post(control::upload_messages))
        .route("/control/phones", post(control::update_phones))
        .route("/realtime/broadcast", post(realtime::publish))
        .route("/realtime/stats", get(realtime::stats))
        .layer(middleware::from_fn_with_state(
            state.control_key.clone(),
            require_control_key,
        ));

    let api_routes = Router::new().merge(realtime_routes).merge(control_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        // Bulk uploads are batched by the control server; 10MB is plenty
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the dashboard origin. Permissive when no origin is configured.
pub fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => base.allow_origin(origin),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid CORS_ALLOWED_ORIGIN; allowing any origin");
            base.allow_origin(Any)
        }
        None => base.allow_origin(Any),
    }
}
