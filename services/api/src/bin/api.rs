//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{db::DbAdapter, telegram::TelegramGateway},
    config::Config,
    error::ApiError,
    web::{self, state::AppState},
};
use hbd_core::{Clock, CredentialStore, MemoryStore, NotificationGateway, OutboxGateway, SystemClock};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Credential Store ---
    let store: Arc<dyn CredentialStore> = if config.uses_memory_store() {
        warn!("Using the in-memory store; all data is lost on shutdown.");
        Arc::new(MemoryStore::new())
    } else {
        info!("Connecting to database...");
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;
        let db_adapter = DbAdapter::new(db_pool);
        info!("Running database migrations...");
        db_adapter.run_migrations().await?;
        info!("Database migrations complete.");
        Arc::new(db_adapter)
    };

    // --- 3. Initialize the Notification Gateway ---
    let gateway: Arc<dyn NotificationGateway> = if config.telegram_dry_run {
        warn!("Telegram dry run enabled; messages are kept in memory and never sent.");
        Arc::new(OutboxGateway::new())
    } else {
        let telegram = TelegramGateway::new(config.telegram_api_base.clone())
            .map_err(|e| ApiError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Arc::new(telegram)
    };

    // --- 4. Build the Shared AppState ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let app_state = Arc::new(AppState::new(config.clone(), store, gateway, clock));

    // --- 5. Start Background Tasks ---
    let shutdown = CancellationToken::new();
    let scheduler_handle = app_state
        .scheduler
        .clone()
        .spawn(config.reminder_interval, shutdown.clone());
    let purge_handle = spawn_rate_limit_purge(app_state.clone(), shutdown.clone());

    // --- 6. Create the Web Router ---
    let app = web::router(app_state)?;

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for the shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            server_shutdown.cancel();
        })
        .await?;

    // --- 8. Drain Background Tasks ---
    shutdown.cancel();
    for handle in [scheduler_handle, purge_handle] {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Server stopped.");
    Ok(())
}

/// Periodically forgets addresses that have been idle for a whole window.
fn spawn_rate_limit_purge(app_state: Arc<AppState>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    let period = app_state.config.rate_limit_window.max(std::time::Duration::from_secs(1)) * 60;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => app_state.rate_limiter.purge_idle(),
            }
        }
    })
}
