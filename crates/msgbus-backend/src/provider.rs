//! Backend selection from configuration.

use std::sync::Arc;

use tracing::info;

use msgbus_core::config::backend::BackendConfig;
use msgbus_core::config::bus::BusConfig;
use msgbus_core::error::BusError;
use msgbus_core::result::BusResult;
use msgbus_core::traits::backend::Backend;

/// Construct the configured backend.
pub async fn create_backend(
    backend: &BackendConfig,
    bus: &BusConfig,
) -> BusResult<Arc<dyn Backend>> {
    match backend.provider.as_str() {
        "redis" => {
            info!("Initializing Redis backend");
            let client = crate::redis::RedisClient::connect(&backend.redis).await?;
            Ok(Arc::new(crate::redis::RedisBackend::new(client, bus.clone())))
        }
        "memory" => {
            info!("Initializing in-memory backend");
            Ok(Arc::new(crate::memory::MemoryBackend::new(bus.clone())))
        }
        other => Err(BusError::configuration(format!(
            "Unknown backend provider: '{other}'. Supported: memory, redis"
        ))),
    }
}
