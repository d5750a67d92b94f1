// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Questline API Server
//!
//! Gamified goal tracking: objectives are decomposed into skill trees
//! by an external AI workflow, and this server stores them, tracks
//! completion/XP/streaks and delivers the workflow's asynchronous
//! replies back to waiting clients.

use questline::{
    config::Config, db::FirestoreDb, services::registry::CORRELATION_TTL, AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DB_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Questline API");

    // Firestore handle connects lazily on first use and reconnects with
    // backoff; the health check drops a dead client.
    let db = FirestoreDb::new(&config.gcp_project_id);
    db.spawn_health_check(DB_HEALTH_CHECK_INTERVAL);

    // Build shared state and start the registry sweepers
    let state = Arc::new(AppState::new(config, db));
    state.spawn_maintenance();
    tracing::info!(
        correlation_ttl_secs = CORRELATION_TTL.as_secs(),
        "Delivery registries initialized"
    );

    // Build router
    let app = questline::routes::create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("questline=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
