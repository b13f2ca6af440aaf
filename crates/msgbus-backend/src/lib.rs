//! # msgbus-backend
//!
//! Store implementations of the msgbus backend contract:
//!
//! - **redis**: the canonical backend: sorted-set backlogs, atomic
//!   scripted publish, pub/sub fan-out
//! - **memory**: in-process backend for tests and single-node runs
//!
//! The backend is selected at runtime based on configuration.

pub mod keys;
pub mod memory;
pub mod provider;
pub mod redis;

pub use memory::MemoryBackend;
pub use provider::create_backend;
