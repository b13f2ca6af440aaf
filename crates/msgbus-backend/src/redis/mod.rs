//! Redis backend: the canonical store implementation.

pub mod backend;
pub mod client;
pub mod script;

pub use backend::RedisBackend;
pub use client::RedisClient;
