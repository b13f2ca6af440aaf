//! Health endpoint.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// Liveness plus backend status. A read-only backend means the store has
/// failed over to a replica and publishes will fail until it recovers.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let backend_readonly = state.bus.backend().is_readonly().await;
    Json(json!({
        "status": "ok",
        "backend_readonly": backend_readonly,
    }))
}
