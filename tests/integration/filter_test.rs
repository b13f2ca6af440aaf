//! Filter pipeline and identity scoping at the HTTP boundary.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;

use msgbus_engine::{IdentityHooks, PublishScope};

use crate::helpers::TestApp;

#[tokio::test]
async fn test_server_filter_drop_is_invisible() {
    let app = TestApp::new().await;
    app.bus.register_server_filter("/hidden", Arc::new(|_| None));

    app.publish("/hidden/x", json!("secret")).await;
    app.publish("/shown", json!("public")).await;

    let response = app.get("/message-bus/abc/poll?/hidden/x=0&/shown=0").await;
    let messages = response.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["channel"], json!("/shown"));
}

#[tokio::test]
async fn test_client_filter_shapes_payload() {
    let app = TestApp::new().await;
    app.bus.register_client_filter(
        "/chat",
        Arc::new(|mut event| {
            event.envelope.data = json!({"wrapped": event.envelope.data});
            Some(event)
        }),
    );

    app.publish("/chat", json!("hello")).await;

    let response = app.get("/message-bus/abc/poll?/chat=0").await;
    assert_eq!(
        response.messages()[0]["data"],
        json!({"wrapped": "hello"})
    );
}

#[tokio::test]
async fn test_user_scoped_delivery_requires_matching_identity() {
    let hooks = IdentityHooks {
        user_id_lookup: Some(Arc::new(|parts: &http::request::Parts| {
            parts
                .headers
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })),
        group_ids_lookup: None,
        site_id_lookup: None,
    };
    let mut config = msgbus_core::config::AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::build(config, hooks).await;

    let scope = PublishScope {
        user_ids: Some(vec!["7".to_string()]),
        ..Default::default()
    };
    app.publish_scoped("/inbox", json!("for user 7"), &scope).await;

    // Matching user sees the message.
    let req = http::Request::builder()
        .method("GET")
        .uri("/message-bus/abc/poll?/inbox=0")
        .header("X-User-Id", "7")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(req).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.messages().len(), 1);

    // Anonymous poll gets nothing.
    let response = app.get("/message-bus/abc/poll?/inbox=0").await;
    assert!(response.messages().is_empty());
}

#[tokio::test]
async fn test_site_scoping_isolates_tenants() {
    let hooks = IdentityHooks {
        user_id_lookup: None,
        group_ids_lookup: None,
        site_id_lookup: Some(Arc::new(|parts: &http::request::Parts| {
            parts
                .headers
                .get("X-Site-Id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })),
    };
    let mut config = msgbus_core::config::AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::build(config, hooks).await;

    let scope = PublishScope {
        site_id: Some("acme".to_string()),
        ..Default::default()
    };
    app.publish_scoped("/news", json!("acme only"), &scope).await;

    let req = http::Request::builder()
        .method("GET")
        .uri("/message-bus/abc/poll?/news=0")
        .header("X-Site-Id", "acme")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(req).await;
    assert_eq!(response.messages().len(), 1);
    assert_eq!(response.messages()[0]["channel"], json!("/news"));

    let req = http::Request::builder()
        .method("GET")
        .uri("/message-bus/abc/poll?/news=0")
        .header("X-Site-Id", "globex")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.send(req).await;
    assert!(response.messages().is_empty());
}

#[tokio::test]
async fn test_client_id_scoped_delivery() {
    let mut config = msgbus_core::config::AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::with_config(config).await;

    let scope = PublishScope {
        client_ids: Some(vec!["special".to_string()]),
        ..Default::default()
    };
    app.publish_scoped("/c", json!("targeted"), &scope).await;

    let response = app.get("/message-bus/special/poll?/c=0").await;
    assert_eq!(response.messages().len(), 1);

    let response = app.get("/message-bus/other/poll?/c=0").await;
    assert!(response.messages().is_empty());
}
