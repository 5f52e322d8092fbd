//! SMS Dashboard API server

use std::sync::Arc;

use anyhow::Context;
use smsdash_api::{
    auth::RedisSessionStore, cors_layer, create_router, ingest::PgRecordStore, realtime::Room,
    AppState, Config,
};
use smsdash_shared::{create_pool, run_migrations};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("smsdash_api=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let sessions = RedisSessionStore::connect(&config.redis_url, &config.session_key_prefix)
        .await
        .context("failed to connect to session store")?;
    tracing::info!("Connected to session store");

    // One room for the life of the process
    let room = Room::global().spawn();

    let state = AppState::from_config(
        &config,
        Arc::new(sessions),
        Arc::new(PgRecordStore::new(pool)),
        room,
    );

    let app = create_router(state).layer(cors_layer(config.cors_allowed_origin.as_deref()));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "SMS dashboard API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
