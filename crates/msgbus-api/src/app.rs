//! Server assembly and runner.

use std::sync::Arc;

use tracing::info;

use msgbus_core::config::AppConfig;
use msgbus_core::error::BusError;
use msgbus_engine::MessageBus;

use crate::router::build_router;
use crate::state::AppState;

/// Start the engine and serve the HTTP API until a shutdown signal.
pub async fn run_server(config: AppConfig, bus: Arc<MessageBus>) -> Result<(), BusError> {
    bus.start();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        bus: Arc::clone(&bus),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BusError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!(addr = %addr, "msgbus listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(bus))
        .await
        .map_err(|e| BusError::internal(format!("Server error: {e}")))
}

/// Wait for ctrl-c, then stop the engine so blocked polls drain before
/// the listener socket closes.
async fn shutdown_signal(bus: Arc<MessageBus>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    if let Err(e) = bus.stop().await {
        tracing::warn!(error = %e, "Engine stop failed during shutdown");
    }
}
