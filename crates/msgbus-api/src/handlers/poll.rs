//! The long-poll endpoint.
//!
//! `POST /<base>/:client_id/poll` (cursors in the body, form or JSON) and
//! `GET /<base>/:client_id/poll` (cursors in the query string) share one
//! handler. The response is a JSON array of messages; in streaming mode it
//! is a chunked body where each chunk is a JSON array followed by a
//! boundary marker, held open until the long-poll deadline.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures::channel::mpsc::UnboundedSender;
use tracing::{debug, warn};

use msgbus_core::error::BusError;
use msgbus_core::result::BusResult;
use msgbus_engine::{ClientSession, Delivery, MessageBus};

use crate::dto::PollRequest;
use crate::state::AppState;

/// Header that opts a poll into chunked streaming mode.
const STREAM_HEADER: &str = "x-msgbus-stream";

/// Boundary written after every chunk in streaming mode.
const CHUNK_BOUNDARY: &str = "\r\n|\r\n";

/// Largest accepted poll body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Handle one long-poll request, blocking up to the configured deadline.
pub async fn poll(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    request: Request,
) -> Result<Response, BusError> {
    let (parts, body) = request.into_parts();
    let poll_request = parse_poll_request(&parts, body).await?;

    let identity = state.bus.hooks().resolve(&parts, client_id);
    let mut session = ClientSession::new(identity);
    session.seq = poll_request.seq;
    session.since_epoch = poll_request.since_epoch.clone();
    session.streaming = poll_request.stream_param || parts.headers.contains_key(STREAM_HEADER);
    for (channel, cursor) in &poll_request.cursors {
        session.watch(channel, *cursor);
    }

    debug!(
        session = %session.id,
        channels = poll_request.cursors.len(),
        seq = session.seq,
        streaming = session.streaming,
        "Poll request"
    );

    let timeout = state.config.bus.long_poll_timeout();
    if session.streaming {
        let keepalive = state.config.bus.keepalive_interval();
        Ok(stream_response(state.bus.clone(), session, timeout, keepalive))
    } else {
        let deliveries = state.bus.wait_for_messages(&mut session, timeout).await?;
        Ok(json_response(&deliveries))
    }
}

/// Parse cursors from the query string (GET) or the body (POST).
async fn parse_poll_request(
    parts: &axum::http::request::Parts,
    body: Body,
) -> BusResult<PollRequest> {
    if parts.method == Method::GET {
        let query = parts.uri.query().unwrap_or("");
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| BusError::bad_request(format!("bad query string: {e}")))?;
        return PollRequest::from_pairs(pairs);
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| BusError::bad_request(format!("unreadable poll body: {e}")))?;

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| BusError::bad_request(format!("bad JSON poll body: {e}")))?;
        PollRequest::from_json(value)
    } else {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes)
            .map_err(|e| BusError::bad_request(format!("bad form poll body: {e}")))?;
        PollRequest::from_pairs(pairs)
    }
}

/// Plain JSON array response with an explicit charset.
fn json_response(deliveries: &[Delivery]) -> Response {
    let mut response = Json(deliveries).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

/// Serialize a batch and send it as one chunk. Returns `false` when the
/// client is gone.
fn send_chunk(tx: &UnboundedSender<Result<Bytes, Infallible>>, batch: &[Delivery]) -> bool {
    let body = match serde_json::to_string(batch) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Failed to serialize streaming chunk");
            return false;
        }
    };
    tx.unbounded_send(Ok(Bytes::from(format!("{body}{CHUNK_BOUNDARY}"))))
        .is_ok()
}

/// Build a chunked streaming response and spawn the task that feeds it.
///
/// Client disconnects surface as send failures on the chunk channel; the
/// feeding task then drops the session, unregistering its waiter.
fn stream_response(
    bus: Arc<MessageBus>,
    mut session: ClientSession,
    timeout: Duration,
    keepalive: Duration,
) -> Response {
    let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, Infallible>>();

    tokio::spawn(async move {
        match bus.backlog_for(&mut session).await {
            Ok(initial) => {
                if !initial.is_empty() && !send_chunk(&tx, &initial) {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Backlog read failed for streaming poll");
                return;
            }
        }

        let mut waiter = bus.register_waiter(&session);

        // Close the race between the backlog read and registration.
        match bus.backlog_for(&mut session).await {
            Ok(raced) => {
                if !raced.is_empty() && !send_chunk(&tx, &raced) {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Backlog read failed for streaming poll");
                return;
            }
        }

        let mut shutdown = bus.shutdown_receiver();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut keepalive_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = shutdown.recv() => break,
                _ = keepalive_timer.tick() => {
                    // An empty array tells the client its cursors are current.
                    if !send_chunk(&tx, &[]) {
                        break;
                    }
                }
                received = waiter.rx.recv() => {
                    let Some(event) = received else { break };
                    let mut batch = Vec::new();
                    if let Some(delivery) = bus.deliver_to(&event, &mut session) {
                        batch.push(delivery);
                    }
                    while let Ok(event) = waiter.rx.try_recv() {
                        if let Some(delivery) = bus.deliver_to(&event, &mut session) {
                            batch.push(delivery);
                        }
                    }
                    if !batch.is_empty() && !send_chunk(&tx, &batch) {
                        break;
                    }
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        )
        .body(Body::from_stream(rx))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
