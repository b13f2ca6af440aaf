//! Unified error types for msgbus.
//!
//! All crates map their internal errors into [`BusError`] for consistent
//! propagation through the ? operator.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Top-level error kind categorization used across the entire bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The backing store is unreachable or failed a command. Transient.
    BackendUnavailable,
    /// The backing store has failed over to a read-only replica.
    BackendReadOnly,
    /// The global backlog was read mid-flush and is missing an entry.
    /// Internal to the subscribe loop; never surfaced to callers.
    BacklogOutOfOrder,
    /// A stored entry failed to decode.
    MalformedMessage,
    /// The request was malformed (bad cursor map, invalid parameter).
    BadRequest,
    /// Input validation failed.
    Validation,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
    /// The service is shutting down or not yet started.
    ServiceUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendUnavailable => write!(f, "BACKEND_UNAVAILABLE"),
            Self::BackendReadOnly => write!(f, "BACKEND_READONLY"),
            Self::BacklogOutOfOrder => write!(f, "BACKLOG_OUT_OF_ORDER"),
            Self::MalformedMessage => write!(f, "MALFORMED_MESSAGE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
        }
    }
}

/// The unified error used throughout msgbus.
///
/// All crate-specific errors are mapped into `BusError` using `From` impls
/// or explicit `.map_err()` calls. This provides a single error type for
/// the entire application boundary.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct BusError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BusError {
    /// Create a new bus error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new bus error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a backend-unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    /// Create a backend-readonly error.
    pub fn backend_readonly(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendReadOnly, message)
    }

    /// Create a backlog-out-of-order error carrying the highest id seen.
    pub fn backlog_out_of_order(highest_id: u64) -> Self {
        Self::new(
            ErrorKind::BacklogOutOfOrder,
            format!("global backlog has a gap after id {highest_id}"),
        )
    }

    /// Create a malformed-message error.
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedMessage, message)
    }

    /// Create a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a service-unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    /// Whether the error is transient and worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::BackendUnavailable | ErrorKind::BacklogOutOfOrder
        )
    }
}

impl IntoResponse for BusError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.kind {
            ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ErrorKind::BackendUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE")
            }
            ErrorKind::BackendReadOnly => (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_READONLY"),
            ErrorKind::ServiceUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ErrorKind::Configuration => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            ErrorKind::Serialization => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            ErrorKind::MalformedMessage => {
                (StatusCode::INTERNAL_SERVER_ERROR, "MALFORMED_MESSAGE")
            }
            ErrorKind::BacklogOutOfOrder => {
                (StatusCode::INTERNAL_SERVER_ERROR, "BACKLOG_OUT_OF_ORDER")
            }
            ErrorKind::Internal => {
                tracing::error!(error = %self.message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ApiErrorResponse {
            error: error_code.to_string(),
            message: self.message.clone(),
        };

        (status, Json(body)).into_response()
    }
}

/// JSON body returned for error responses.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiErrorResponse {
    /// Stable machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

impl Clone for BusError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for BusError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
