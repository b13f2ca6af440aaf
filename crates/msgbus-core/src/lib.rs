//! # msgbus-core
//!
//! Core crate for msgbus. Contains the message record and wire codec,
//! configuration schemas, the backend contract, and the unified error
//! system.
//!
//! This crate has **no** internal dependencies on other msgbus crates.

pub mod config;
pub mod error;
pub mod message;
pub mod result;
pub mod traits;

pub use error::BusError;
pub use message::Message;
pub use result::BusResult;
