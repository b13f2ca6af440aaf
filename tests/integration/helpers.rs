//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use msgbus_api::state::AppState;
use msgbus_backend::MemoryBackend;
use msgbus_core::config::AppConfig;
use msgbus_engine::{IdentityHooks, MessageBus, PublishScope};

/// Test application context.
pub struct TestApp {
    /// The Axum router for making test requests.
    pub router: Router,
    /// The engine, for publishing directly.
    pub bus: Arc<MessageBus>,
}

impl TestApp {
    /// Create a test application with default configuration.
    pub async fn new() -> Self {
        Self::build(AppConfig::default(), IdentityHooks::default()).await
    }

    /// Create a test application with custom configuration.
    pub async fn with_config(config: AppConfig) -> Self {
        Self::build(config, IdentityHooks::default()).await
    }

    /// Assemble the full stack over an in-memory backend.
    pub async fn build(config: AppConfig, hooks: IdentityHooks) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.bus.clone()));
        let bus = Arc::new(MessageBus::new(backend, config.bus.clone(), hooks));
        bus.start();
        // Let the listener attach to the fan-out before tests publish.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = AppState {
            config: Arc::new(config),
            bus: Arc::clone(&bus),
        };
        let router = msgbus_api::build_router(state);

        Self { router, bus }
    }

    /// Publish through the engine, panicking on failure.
    pub async fn publish(&self, channel: &str, data: Value) -> u64 {
        self.bus
            .publish(channel, data, &PublishScope::default())
            .await
            .expect("publish failed")
    }

    /// Publish with explicit scoping.
    pub async fn publish_scoped(&self, channel: &str, data: Value, scope: &PublishScope) -> u64 {
        self.bus
            .publish(channel, data, scope)
            .await
            .expect("scoped publish failed")
    }

    /// GET a path and parse the JSON response.
    pub async fn get(&self, path: &str) -> TestResponse {
        let req = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(req).await
    }

    /// POST a JSON body and parse the JSON response.
    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");
        self.send(req).await
    }

    /// POST a form-encoded body and parse the JSON response.
    pub async fn post_form(&self, path: &str, form: &str) -> TestResponse {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .expect("Failed to build request");
        self.send(req).await
    }

    /// Drive a request through the router.
    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }

    /// Drive a request and return the raw body (for streaming responses).
    pub async fn send_raw(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");
        (status, body_bytes.to_vec())
    }
}

/// Response from a test request.
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Parsed JSON body.
    pub body: Value,
}

impl TestResponse {
    /// The body as a JSON array, panicking if it is not one.
    pub fn messages(&self) -> &Vec<Value> {
        self.body.as_array().expect("response body is not an array")
    }
}
