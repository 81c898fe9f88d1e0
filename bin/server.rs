// Cashbook - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cashbook::api::{self, AppState};
use cashbook::{observability, Ledger, LedgerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_logging();

    let config = LedgerConfig::from_env();

    let ledger = Ledger::open(&config.database_path)
        .with_context(|| format!("Failed to open ledger at {}", config.database_path.display()))?;
    tracing::info!(path = %config.database_path.display(), "database opened");

    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

    let state = AppState {
        ledger: Arc::new(ledger),
        upload_dir: config.upload_dir.clone(),
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "server listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}
