//! The reliable-pubsub listener task.
//!
//! One background task per process bridges the backend's global
//! subscription to engine dispatch. Transient backend failures are logged
//! and retried with a 1 second backoff, forever; a clean unsubscribe
//! (engine stop) ends the task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use msgbus_core::traits::backend::MessageHandler;

use crate::bus::MessageBus;

/// Backoff between reconnect attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run the listener until the engine stops.
pub(crate) async fn run(bus: Arc<MessageBus>) {
    info!("Reliable pub/sub listener started");

    while bus.is_running() {
        let after = bus.watermark();
        let handler: MessageHandler = {
            let bus = Arc::clone(&bus);
            Arc::new(move |message| bus.dispatch(message))
        };

        match bus.backend().global_subscribe(after, handler).await {
            Ok(()) => break,
            Err(e) => {
                error!(error = %e, "Global subscription failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    info!("Reliable pub/sub listener stopped");
}
