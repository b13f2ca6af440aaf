//! # msgbus-api
//!
//! HTTP surface of msgbus: the long-poll endpoint (plain and chunked
//! streaming), health checks, request parsing, and the server runner.

pub mod app;
pub mod dto;
pub mod handlers;
pub mod router;
pub mod state;

pub use app::run_server;
pub use router::build_router;
pub use state::AppState;
