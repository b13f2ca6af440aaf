//! Ordering guarantees across channels and reconnects.

use serde_json::json;

use crate::helpers::TestApp;

#[tokio::test]
async fn test_cross_channel_ids() {
    let app = TestApp::new().await;
    app.publish("/a", json!("1")).await;
    app.publish("/b", json!("2")).await;
    app.publish("/a", json!("3")).await;

    let response = app.get("/message-bus/abc/poll?/a=0&/b=0").await;
    let messages = response.messages();
    assert_eq!(messages.len(), 3);

    // Global ids reflect commit order across channels.
    let mut globals: Vec<u64> = messages
        .iter()
        .map(|m| m["global_id"].as_u64().unwrap())
        .collect();
    globals.sort();
    assert_eq!(globals, vec![1, 2, 3]);

    // Per-channel ids are independent sequences.
    let a_ids: Vec<u64> = messages
        .iter()
        .filter(|m| m["channel"] == json!("/a"))
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    let b_ids: Vec<u64> = messages
        .iter()
        .filter(|m| m["channel"] == json!("/b"))
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(a_ids, vec![1, 2]);
    assert_eq!(b_ids, vec![1]);
}

#[tokio::test]
async fn test_per_channel_order_is_ascending_in_response() {
    let app = TestApp::new().await;
    for i in 1..=5 {
        app.publish("/seq", json!(i)).await;
    }

    let response = app.get("/message-bus/abc/poll?/seq=0").await;
    let ids: Vec<u64> = response
        .messages()
        .iter()
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_reconnect_with_same_cursor_is_exactly_once() {
    let app = TestApp::new().await;
    for i in 1..=4 {
        app.publish("/r", json!(i)).await;
    }

    // First poll from cursor 2.
    let first = app.get("/message-bus/abc/poll?/r=2").await;
    let first_ids: Vec<u64> = first
        .messages()
        .iter()
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(first_ids, vec![3, 4]);

    // A disconnect loses nothing: the same cursor replays the same tail.
    let again = app.get("/message-bus/abc/poll?/r=2").await;
    let again_ids: Vec<u64> = again
        .messages()
        .iter()
        .map(|m| m["message_id"].as_u64().unwrap())
        .collect();
    assert_eq!(again_ids, vec![3, 4]);
}

#[tokio::test]
async fn test_publish_visible_to_immediate_poll() {
    let app = TestApp::new().await;

    // publish() resolving guarantees backlog visibility.
    let id = app.publish("/now", json!("committed")).await;
    assert_eq!(id, 1);

    let response = app.get("/message-bus/abc/poll?/now=0").await;
    assert_eq!(response.messages().len(), 1);
}
