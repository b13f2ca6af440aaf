//! Convenience result type alias for msgbus.

use crate::error::BusError;

/// A specialized `Result` type for msgbus operations.
///
/// This is defined as a convenience so that every crate does not need to
/// write `Result<T, BusError>` explicitly.
pub type BusResult<T> = Result<T, BusError>;
