//! The bus engine: publish API, session waits, filter pipeline, lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use msgbus_core::config::bus::BusConfig;
use msgbus_core::message::Message;
use msgbus_core::result::BusResult;
use msgbus_core::traits::backend::{Backend, PublishOpts};

use crate::event::BusEvent;
use crate::filters::{FilterChain, MessageFilter};
use crate::identity::IdentityHooks;
use crate::listener;
use crate::registry::{LocalHandler, LocalSubscribers, SubscriberRegistry, SubscriptionId, WaiterGuard};
use crate::session::{ClientSession, Delivery, scoped_channel};

/// Scoping and backlog options for a single publish.
///
/// This is the closed set of recognized options; there is no open map.
#[derive(Debug, Clone, Default)]
pub struct PublishScope {
    /// Restrict visibility to these user ids.
    pub user_ids: Option<Vec<String>>,
    /// Restrict visibility to members of these groups.
    pub group_ids: Option<Vec<String>>,
    /// Restrict visibility to these long-poll clients.
    pub client_ids: Option<Vec<String>>,
    /// Namespace the channel under this tenant.
    pub site_id: Option<String>,
    /// Override the backlog age bound for this publish.
    pub max_backlog_age: Option<Duration>,
    /// Override the per-channel backlog size bound for this publish.
    pub max_backlog_size: Option<u64>,
}

/// A registered long-poll waiter: the wake receiver plus the registry
/// guard that unregisters it on drop.
#[derive(Debug)]
pub struct SessionWaiter {
    /// Receives events dispatched on the session's channels.
    pub rx: mpsc::UnboundedReceiver<BusEvent>,
    _guard: WaiterGuard,
}

/// The per-process bus engine.
///
/// Owns the subscriber registry and the filter chains, delegates storage
/// to the backend, and runs one reliable-pubsub listener task bridging
/// the backend's global subscription to local dispatch.
pub struct MessageBus {
    /// Storage and fan-out.
    backend: Arc<dyn Backend>,
    /// Timing and backlog bounds.
    config: BusConfig,
    /// Blocked long-poll sessions.
    registry: Arc<SubscriberRegistry>,
    /// In-process subscribers.
    local: LocalSubscribers,
    /// Filters applied once per dispatched message.
    server_filters: RwLock<FilterChain>,
    /// Filters applied per delivery to shape the wire payload.
    client_filters: RwLock<FilterChain>,
    /// Identity resolvers injected by the host application.
    hooks: IdentityHooks,
    /// Whether the listener should keep running.
    running: AtomicBool,
    /// Highest global id seen by the listener; reconnect cursor.
    last_global_id: AtomicU64,
    /// Listener task handle.
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Wakes every blocked session on shutdown.
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("last_global_id", &self.last_global_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl MessageBus {
    /// Create an engine over a backend. Call [`MessageBus::start`] to begin
    /// live delivery.
    pub fn new(backend: Arc<dyn Backend>, config: BusConfig, hooks: IdentityHooks) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            backend,
            config,
            registry: Arc::new(SubscriberRegistry::new()),
            local: LocalSubscribers::new(),
            server_filters: RwLock::new(FilterChain::new()),
            client_filters: RwLock::new(FilterChain::new()),
            hooks,
            running: AtomicBool::new(false),
            last_global_id: AtomicU64::new(0),
            listener: std::sync::Mutex::new(None),
            shutdown_tx,
        }
    }

    /// The engine's bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// The backend this engine delegates to.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The injected identity resolvers.
    pub fn hooks(&self) -> &IdentityHooks {
        &self.hooks
    }

    /// Whether the listener is (or should be) running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reconnect cursor for the listener: `None` until the first dispatch.
    pub(crate) fn watermark(&self) -> Option<u64> {
        match self.last_global_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    // ── Filters ──────────────────────────────────────────────

    /// Register a server-side filter for a channel prefix. Runs once per
    /// dispatched message, before any session sees it.
    pub fn register_server_filter(&self, prefix: impl Into<String>, filter: MessageFilter) {
        self.server_filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(prefix, filter);
    }

    /// Register a client-side filter for a channel prefix. Runs per
    /// delivery, shaping the payload each session receives.
    pub fn register_client_filter(&self, prefix: impl Into<String>, filter: MessageFilter) {
        self.client_filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(prefix, filter);
    }

    // ── Publish ──────────────────────────────────────────────

    /// Publish `data` on `channel`, returning the assigned per-channel
    /// message id. Never retried internally: backend failures surface to
    /// the caller.
    pub async fn publish(&self, channel: &str, data: Value, scope: &PublishScope) -> BusResult<u64> {
        let stored = scoped_channel(channel, scope.site_id.as_deref());
        let envelope = crate::envelope::PublishEnvelope {
            data,
            user_ids: scope.user_ids.clone(),
            group_ids: scope.group_ids.clone(),
            client_ids: scope.client_ids.clone(),
        };
        let payload = serde_json::to_string(&envelope)?;

        let opts = PublishOpts {
            max_backlog_age: scope.max_backlog_age,
            max_backlog_size: scope.max_backlog_size,
            max_global_backlog_size: None,
        };

        let id = self.backend.publish(&stored, &payload, &opts).await?;
        debug!(channel = %stored, message_id = id, "Published message");
        Ok(id)
    }

    /// Last assigned message id for a channel, honoring site scoping.
    pub async fn last_id(&self, channel: &str, site_id: Option<&str>) -> BusResult<u64> {
        self.backend
            .last_id(&scoped_channel(channel, site_id))
            .await
    }

    // ── Local subscriptions ──────────────────────────────────

    /// Subscribe an in-process handler to one channel (stored name), or to
    /// every channel with `None`. Delivery happens on the reliable-pubsub
    /// path, after server filters.
    pub fn local_subscribe(&self, channel: Option<&str>, handler: LocalHandler) -> SubscriptionId {
        self.local.register(channel.map(String::from), handler)
    }

    /// Remove a local subscription.
    pub fn local_unsubscribe(&self, id: SubscriptionId) {
        self.local.unregister(id);
    }

    // ── Session delivery ─────────────────────────────────────

    /// Read everything the session's cursors have missed from the backend.
    /// Advances cursors past every message seen, delivered or not.
    pub async fn backlog_for(&self, session: &mut ClientSession) -> BusResult<Vec<Delivery>> {
        let mut out = Vec::new();
        for stored in session.channels() {
            let cursor = session.cursor(&stored).unwrap_or(0);
            for message in self.backend.backlog(&stored, cursor).await? {
                let Some(event) = self.decode_event(message) else {
                    continue;
                };
                let Some(event) = self.apply_server_filters(event) else {
                    continue;
                };
                if let Some(delivery) = self.deliver_to(&event, session) {
                    out.push(delivery);
                }
            }
        }
        Ok(out)
    }

    /// Register the session as a waiter on its channels. Events dispatched
    /// while the returned waiter lives arrive on its receiver; dropping it
    /// unregisters.
    pub fn register_waiter(&self, session: &ClientSession) -> SessionWaiter {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.registry.register(session.id, session.channels(), tx);
        SessionWaiter { rx, _guard: guard }
    }

    /// A shutdown receiver; fires when the engine stops.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run the per-session half of the pipeline for one event: visibility,
    /// cursor dedup, client filters. `None` means nothing to deliver.
    pub fn deliver_to(&self, event: &BusEvent, session: &mut ClientSession) -> Option<Delivery> {
        // Cursor advances even for messages this session may not see, so a
        // hidden message is not re-examined on every wake.
        if !session.advance(&event.channel, event.message_id) {
            return None;
        }
        if !session.allowed(&event.envelope) {
            return None;
        }

        let shaped = self
            .client_filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event.clone())?;

        Some(Delivery {
            global_id: shaped.global_id,
            message_id: shaped.message_id,
            channel: session.requested_name(&shaped.channel),
            data: shaped.envelope.data,
        })
    }

    /// Block until a watched channel receives something above the
    /// session's cursor, the timeout elapses, or the engine stops.
    ///
    /// Returns the first non-empty batch; an empty vector means timeout or
    /// shutdown (the HTTP layer turns that into a keepalive).
    pub async fn wait_for_messages(
        &self,
        session: &mut ClientSession,
        timeout: Duration,
    ) -> BusResult<Vec<Delivery>> {
        let initial = self.backlog_for(session).await?;
        if !initial.is_empty() || session.is_empty() {
            return Ok(initial);
        }

        let mut waiter = self.register_waiter(session);

        // A publish may have landed between the backlog read and the
        // registration above; re-check before suspending.
        let raced = self.backlog_for(session).await?;
        if !raced.is_empty() {
            return Ok(raced);
        }

        let mut shutdown = self.shutdown_receiver();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(Vec::new()),
                _ = shutdown.recv() => return Ok(Vec::new()),
                received = waiter.rx.recv() => {
                    let Some(event) = received else {
                        return Ok(Vec::new());
                    };
                    let mut batch = Vec::new();
                    if let Some(delivery) = self.deliver_to(&event, session) {
                        batch.push(delivery);
                    }
                    while let Ok(event) = waiter.rx.try_recv() {
                        if let Some(delivery) = self.deliver_to(&event, session) {
                            batch.push(delivery);
                        }
                    }
                    if !batch.is_empty() {
                        return Ok(batch);
                    }
                    // Everything was filtered away; keep waiting.
                }
            }
        }
    }

    // ── Dispatch (reliable-pubsub path) ──────────────────────

    /// Decode a wire message, skipping malformed entries with a warning.
    fn decode_event(&self, message: Message) -> Option<BusEvent> {
        match BusEvent::decode(message) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "Skipping message with malformed envelope");
                None
            }
        }
    }

    /// Run the server filter chain.
    fn apply_server_filters(&self, event: BusEvent) -> Option<BusEvent> {
        self.server_filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event)
    }

    /// Entry point for the reliable-pubsub listener: fan a message out to
    /// local subscribers and blocked sessions.
    pub(crate) fn dispatch(&self, message: Message) {
        self.last_global_id
            .store(message.global_id, Ordering::SeqCst);

        let Some(event) = self.decode_event(message) else {
            return;
        };
        let Some(event) = self.apply_server_filters(event) else {
            return;
        };

        self.local.dispatch(&event);
        let woken = self.registry.dispatch(&event);
        debug!(channel = %event.channel, global_id = event.global_id, woken, "Dispatched message");
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Start the reliable-pubsub listener. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = tokio::spawn(listener::run(Arc::clone(self)));
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Message bus started");
    }

    /// Stop the engine: wake every blocked session, unsubscribe the
    /// listener, and join it.
    pub async fn stop(&self) -> BusResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(());
        self.backend.global_unsubscribe().await?;

        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Message bus stopped");
        Ok(())
    }

    /// Re-establish backend connections and restart the listener after a
    /// process fork. Sessions blocked in the parent are abandoned to it.
    pub async fn after_fork(self: &Arc<Self>) -> BusResult<()> {
        let old = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = old {
            handle.abort();
        }

        self.backend.after_fork().await?;

        if self.is_running() {
            let handle = tokio::spawn(listener::run(Arc::clone(self)));
            *self
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        Ok(())
    }

    /// Stop the engine and release the backend.
    pub async fn destroy(&self) -> BusResult<()> {
        self.stop().await?;
        self.backend.destroy().await
    }
}
