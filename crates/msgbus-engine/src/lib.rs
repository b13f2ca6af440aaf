//! # msgbus-engine
//!
//! The in-process reliable-pubsub engine: subscriber registry, long-poll
//! session state, the blocking wait primitive, filter dispatch, identity
//! hooks, and the background listener bridging the backend's global
//! subscription to local delivery.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod filters;
pub mod identity;
mod listener;
pub mod registry;
pub mod session;

pub use bus::{MessageBus, PublishScope, SessionWaiter};
pub use event::BusEvent;
pub use filters::{FilterChain, MessageFilter};
pub use identity::{IdentityHooks, SessionIdentity};
pub use registry::{LocalHandler, SubscriptionId};
pub use session::{ClientSession, Delivery};
