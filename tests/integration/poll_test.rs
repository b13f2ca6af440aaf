//! Long-poll endpoint behavior: catch-up, wake, keepalive, error cases.

use std::time::Duration;

use http::StatusCode;
use serde_json::json;

use msgbus_core::config::AppConfig;

use crate::helpers::TestApp;

#[tokio::test]
async fn test_basic_publish_receive() {
    let app = TestApp::new().await;
    app.publish("/chat", json!("hi")).await;

    let response = app.get("/message-bus/abc/poll?/chat=0").await;
    assert_eq!(response.status, StatusCode::OK);

    let messages = response.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["channel"], json!("/chat"));
    assert_eq!(messages[0]["data"], json!("hi"));
    assert_eq!(messages[0]["message_id"], json!(1));
}

#[tokio::test]
async fn test_cursor_catch_up() {
    let app = TestApp::new().await;
    for i in 1..=3 {
        app.publish("/x", json!(format!("m{i}"))).await;
    }

    let response = app.get("/message-bus/abc/poll?/x=1").await;
    let ids: Vec<u64> = response
        .messages()
        .iter()
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);
}

#[tokio::test]
async fn test_current_cursor_times_out_with_empty_array() {
    let mut config = AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::with_config(config).await;

    app.publish("/x", json!("seen")).await;

    let response = app.get("/message-bus/abc/poll?/x=1").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.messages().is_empty());
}

#[tokio::test]
async fn test_long_poll_wakes_on_publish() {
    let app = TestApp::new().await;
    let last = app.bus.last_id("/live", None).await.unwrap();

    let pending = {
        let app_router = app.router.clone();
        tokio::spawn(async move {
            use axum::body::Body;
            use tower::ServiceExt;
            let req = http::Request::builder()
                .method("GET")
                .uri(format!("/message-bus/abc/poll?/live={last}"))
                .body(Body::empty())
                .unwrap();
            let response = app_router.oneshot(req).await.unwrap();
            axum::body::to_bytes(response.into_body(), 1024 * 1024)
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    app.publish("/live", json!("wake")).await;

    let body = tokio::time::timeout(Duration::from_millis(100), pending)
        .await
        .expect("long poll must wake within 100ms")
        .unwrap();
    let messages: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(messages[0]["data"], json!("wake"));
}

#[tokio::test]
async fn test_post_json_body() {
    let app = TestApp::new().await;
    app.publish("/a", json!("first")).await;

    let response = app
        .post_json("/message-bus/client-1/poll", json!({"/a": 0, "__seq": 4}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.messages().len(), 1);
    assert_eq!(response.messages()[0]["data"], json!("first"));
}

#[tokio::test]
async fn test_post_form_body() {
    let app = TestApp::new().await;
    app.publish("/f", json!("form")).await;

    let response = app
        .post_form("/message-bus/client-1/poll", "/f=0&__seq=1")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.messages()[0]["data"], json!("form"));
}

#[tokio::test]
async fn test_malformed_cursor_is_a_client_error() {
    let app = TestApp::new().await;

    let response = app.get("/message-bus/abc/poll?/chat=banana").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .post_json("/message-bus/abc/poll", json!({"/chat": -1}))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app.post_json("/message-bus/abc/poll", json!([1, 2])).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reserved_params_are_not_channels() {
    let mut config = AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::with_config(config).await;

    // Nothing published: if __seq or __since_epoch were treated as
    // channels the cursor map would not be empty and the request would
    // block instead of returning straight away.
    let response = app
        .get("/message-bus/abc/poll?__seq=9&__since_epoch=123")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.messages().is_empty());
}

#[tokio::test]
async fn test_nonexistent_channel_cursor_zero() {
    let mut config = AppConfig::default();
    config.bus.long_poll_timeout_secs = 0;
    let app = TestApp::with_config(config).await;

    let response = app.get("/message-bus/abc/poll?/ghost=0").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.messages().is_empty());
}

#[tokio::test]
async fn test_trim_leaves_contiguous_tail() {
    let mut config = AppConfig::default();
    config.bus.max_backlog_size = 5;
    config.bus.clear_every = 1;
    let app = TestApp::with_config(config).await;

    for i in 1..=10 {
        app.publish("/c", json!(format!("m{i}"))).await;
    }

    let response = app.get("/message-bus/abc/poll?/c=0").await;
    let ids: Vec<u64> = response
        .messages()
        .iter()
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![6, 7, 8, 9, 10]);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;

    let response = app.get("/message-bus/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], json!("ok"));
    assert_eq!(response.body["backend_readonly"], json!(false));
}

#[tokio::test]
async fn test_structured_payload_passes_through() {
    let app = TestApp::new().await;
    app.publish("/json", json!({"kind": "post", "id": 42})).await;

    let response = app.get("/message-bus/abc/poll?/json=0").await;
    assert_eq!(
        response.messages()[0]["data"],
        json!({"kind": "post", "id": 42})
    );
}
