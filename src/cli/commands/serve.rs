use std::sync::Arc;

use anyhow::Context;

use crate::app::{app, AppState};
use crate::config;
use crate::database::DatabaseManager;
use crate::storage::FilesystemBackend;

pub async fn handle(migrate: bool) -> anyhow::Result<()> {
    let config = config::config();
    tracing::info!("Starting EventDesk API in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    // Lazy pool: the server comes up and reports degraded health while the
    // database is unreachable.
    tracing::info!(database = %config.redacted_database_url(), "Using database");
    let pool = DatabaseManager::connect_lazy(&config.database)?;
    if migrate || config.database.run_migrations {
        DatabaseManager::migrate(&pool).await.context("failed to apply migrations")?;
    }

    let storage = FilesystemBackend::new(&config.storage.root);
    tokio::fs::create_dir_all(storage.root())
        .await
        .with_context(|| format!("failed to create storage root {}", config.storage.root))?;

    let state = AppState::new(pool, Arc::new(storage), config.storage.max_upload_bytes);
    let router = app(state, config);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!(addr = %bind_addr, "EventDesk API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
