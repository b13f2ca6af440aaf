//! Application state shared across all handlers.

use std::sync::Arc;

use msgbus_core::config::AppConfig;
use msgbus_engine::MessageBus;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The bus engine.
    pub bus: Arc<MessageBus>,
}
