//! msgbus server: ordered at-least-once pub/sub with HTTP long-polling.
//!
//! Main entry point that wires the backend, engine, and API together and
//! starts the server.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use msgbus_core::config::AppConfig;
use msgbus_core::error::BusError;
use msgbus_engine::{IdentityHooks, MessageBus};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment.
fn load_configuration() -> Result<AppConfig, BusError> {
    let env = std::env::var("MSGBUS_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Main server run function.
async fn run(config: AppConfig) -> Result<(), BusError> {
    tracing::info!(provider = %config.backend.provider, "Initializing backend");
    let backend = msgbus_backend::create_backend(&config.backend, &config.bus).await?;

    // Identity hooks are the host application's integration point; the
    // standalone server runs unscoped.
    let bus = Arc::new(MessageBus::new(
        backend,
        config.bus.clone(),
        IdentityHooks::default(),
    ));

    msgbus_api::run_server(config, bus).await
}
