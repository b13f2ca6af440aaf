//! Behavior contracts implemented across the workspace.

pub mod backend;

pub use backend::{Backend, MessageHandler, PublishOpts};
