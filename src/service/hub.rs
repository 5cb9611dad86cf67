//! Connection hub: one shared transport fanned out to many subscribers.
//!
//! [`ConnectionHub`] owns at most one live transport, the registry of
//! subscribers, and the most recent inbound message. Everything is reset
//! together when the transport closes, so a later connection starts clean.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::domain::{EventBus, LifecycleEvent, SubscriberId};
use crate::error::HubError;
use crate::ws::messages::PredictionRequest;
use crate::ws::subscription::{Subscriber, SubscriberRegistry, invoke_isolated};
use crate::ws::transport::{
    EventSink, EventTarget, ReadyState, Transport, TransportEvent, TransportFactory,
};

/// Path appended to the base URL passed to [`ConnectionHub::connect`].
pub const DEFAULT_WS_PATH: &str = "/api/ws";

/// Default capacity of the lifecycle event channel.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 64;

/// Tunables for a [`ConnectionHub`].
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Path appended to every base URL.
    pub ws_path: String,
    /// Capacity of the lifecycle broadcast channel.
    pub event_bus_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            ws_path: DEFAULT_WS_PATH.to_string(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; `connect` will open one.
    Absent,
    /// A transport is being opened.
    Connecting,
    /// Frames can be sent.
    Open,
    /// The transport is shutting down; its close event has not arrived yet.
    Closing,
}

/// Shared WebSocket connection with JSON fan-out.
///
/// Cheap to clone; all clones share the same connection and subscribers.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

#[derive(Debug)]
struct HubInner {
    factory: Arc<dyn TransportFactory>,
    ws_path: String,
    state: Mutex<HubState>,
    events: EventBus,
}

#[derive(Debug, Default)]
struct HubState {
    connection: Option<LiveConnection>,
    registry: SubscriberRegistry,
    last_message: Option<Value>,
    next_generation: u64,
}

#[derive(Debug)]
struct LiveConnection {
    generation: u64,
    url: String,
    /// `None` while the factory is still starting the transport.
    transport: Option<Arc<dyn Transport>>,
    /// `close()` arrived before the transport was attached.
    close_pending: bool,
}

impl HubState {
    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|conn| conn.generation == generation)
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.connection
            .as_ref()
            .and_then(|conn| conn.transport.as_ref())
            .map(Arc::clone)
    }
}

/// Handle returned by [`ConnectionHub::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriberId,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// ID of the subscribed callback.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Removes the callback from the hub. Returns `true` if it was still
    /// registered.
    pub fn unsubscribe(&self) -> bool {
        self.hub
            .upgrade()
            .is_some_and(|inner| inner.unsubscribe(self.id))
    }
}

impl ConnectionHub {
    /// Creates a hub that opens transports through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_options(factory, HubOptions::default())
    }

    /// Creates a hub with explicit options.
    #[must_use]
    pub fn with_options(factory: Arc<dyn TransportFactory>, options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                factory,
                ws_path: options.ws_path,
                state: Mutex::new(HubState::default()),
                events: EventBus::new(options.event_bus_capacity),
            }),
        }
    }

    /// Opens the shared connection to `url` + the WebSocket path, unless one
    /// already exists, then registers `initial_subscriber` if given.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the factory cannot start a
    /// transport. The hub stays disconnected and a later call may retry.
    pub fn connect(&self, url: &str, initial_subscriber: Option<Subscriber>) -> Result<(), HubError> {
        let opening = {
            let mut state = self.inner.lock_state();
            if let Some(conn) = &state.connection {
                tracing::debug!(generation = conn.generation, "websocket already exists, reusing connection");
                None
            } else {
                state.next_generation += 1;
                let generation = state.next_generation;
                let target = format!("{url}{}", self.inner.ws_path);
                state.connection = Some(LiveConnection {
                    generation,
                    url: target.clone(),
                    transport: None,
                    close_pending: false,
                });
                Some((generation, target))
            }
        };

        if let Some((generation, target)) = opening {
            self.open_transport(generation, &target)?;
        }

        if let Some(callback) = initial_subscriber {
            self.subscribe(callback, true);
        }
        Ok(())
    }

    fn open_transport(&self, generation: u64, target: &str) -> Result<(), HubError> {
        tracing::info!(generation, url = %target, "opening websocket connection");

        let weak: Weak<dyn EventTarget> = Arc::downgrade(&self.inner) as Weak<dyn EventTarget>;
        let sink = EventSink::new(weak, generation);

        match self.inner.factory.open(target, sink) {
            Ok(transport) => {
                let close_now = {
                    let mut state = self.inner.lock_state();
                    match state.connection.as_mut() {
                        Some(conn) if conn.generation == generation => {
                            conn.transport = Some(Arc::clone(&transport));
                            conn.close_pending
                        }
                        _ => {
                            tracing::debug!(generation, "transport closed before it was attached");
                            false
                        }
                    }
                };
                if close_now {
                    tracing::debug!(generation, "applying close requested while opening");
                    transport.close();
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    generation,
                    url = %target,
                    code = err.error_code(),
                    error = %err,
                    "failed to open websocket"
                );
                let mut state = self.inner.lock_state();
                if state.is_current(generation) {
                    state.connection = None;
                }
                Err(err)
            }
        }
    }

    /// Registers `callback` for every inbound message.
    ///
    /// When `replay_last` is set and a message is cached, the callback is
    /// invoked with it before this method returns. Errors and panics from
    /// that call are logged, never propagated.
    pub fn subscribe(&self, callback: Subscriber, replay_last: bool) -> Subscription {
        let (id, total, replay) = {
            let mut state = self.inner.lock_state();
            let id = state.registry.insert(Arc::clone(&callback));
            let replay = if replay_last {
                state.last_message.clone()
            } else {
                None
            };
            (id, state.registry.len(), replay)
        };
        tracing::debug!(subscriber_id = %id, subscribers = total, "subscribed callback");

        if let Some(message) = replay {
            tracing::debug!(subscriber_id = %id, "calling new subscriber with last cached message");
            invoke_isolated(id, &callback, &message);
        }

        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Removes a subscriber. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Returns a copy of the most recent inbound message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<Value> {
        self.inner.lock_state().last_message.clone()
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_state().registry.len()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        let state = self.inner.lock_state();
        match &state.connection {
            None => ConnectionState::Absent,
            Some(LiveConnection { transport: None, .. }) => ConnectionState::Connecting,
            Some(LiveConnection {
                transport: Some(transport),
                ..
            }) => match transport.ready_state() {
                ReadyState::Connecting => ConnectionState::Connecting,
                ReadyState::Open => ConnectionState::Open,
                ReadyState::Closing | ReadyState::Closed => ConnectionState::Closing,
            },
        }
    }

    /// Returns `true` if frames can be sent right now.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection_state() == ConnectionState::Open
    }

    /// Returns a receiver for connection lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Sends `{"text": text, "additional_context": additional_context}`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] (after logging) when there is no
    /// open connection; nothing is written in that case.
    pub fn send_text(&self, text: &str, additional_context: &str) -> Result<(), HubError> {
        let transport = self.open_transport_handle()?;
        let frame = serde_json::to_string(&PredictionRequest::new(text, additional_context))?;
        write_frame(transport.as_ref(), frame)
    }

    /// Writes an already encoded frame to the open transport.
    pub(crate) fn send_frame(&self, frame: String) -> Result<(), HubError> {
        let transport = self.open_transport_handle()?;
        write_frame(transport.as_ref(), frame)
    }

    fn open_transport_handle(&self) -> Result<Arc<dyn Transport>, HubError> {
        let transport = self
            .inner
            .lock_state()
            .transport()
            .filter(|t| t.ready_state() == ReadyState::Open);
        transport.ok_or_else(|| {
            tracing::error!("can't send text: websocket not connected");
            HubError::NotConnected
        })
    }

    /// Asks the transport to close. State is reset when its close event
    /// arrives.
    ///
    /// A close requested while the transport is still being opened is
    /// applied as soon as it is attached.
    pub fn close(&self) {
        let transport = {
            let mut state = self.inner.lock_state();
            match state.connection.as_mut() {
                None => {
                    tracing::debug!("close requested without a connection");
                    return;
                }
                Some(conn) => match &conn.transport {
                    Some(transport) => Arc::clone(transport),
                    None => {
                        tracing::debug!(generation = conn.generation, "close deferred until transport is attached");
                        conn.close_pending = true;
                        return;
                    }
                },
            }
        };
        transport.close();
    }
}

fn write_frame(transport: &dyn Transport, frame: String) -> Result<(), HubError> {
    transport
        .send_text(frame)
        .inspect_err(|err| tracing::error!(code = err.error_code(), error = %err, "websocket send failed"))
}

impl HubInner {
    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (removed, total) = {
            let mut state = self.lock_state();
            let removed = state.registry.remove(id);
            (removed, state.registry.len())
        };
        tracing::debug!(subscriber_id = %id, removed, subscribers = total, "unsubscribed callback");
        removed
    }

    fn on_open(&self, generation: u64) {
        let url = {
            let state = self.lock_state();
            match &state.connection {
                Some(conn) if conn.generation == generation => conn.url.clone(),
                _ => {
                    tracing::debug!(generation, "ignoring open from stale transport");
                    return;
                }
            }
        };
        tracing::info!(generation, url = %url, "websocket connected");
        self.events.publish(LifecycleEvent::Connected {
            generation,
            url,
            timestamp: Utc::now(),
        });
    }

    fn on_message(&self, generation: u64, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(generation, error = %err, "error parsing websocket message");
                return;
            }
        };

        let subscribers = {
            let mut state = self.lock_state();
            if !state.is_current(generation) {
                tracing::debug!(generation, "ignoring message from stale transport");
                return;
            }
            state.last_message = Some(message.clone());
            state.registry.snapshot()
        };

        for (id, callback) in &subscribers {
            invoke_isolated(*id, callback, &message);
        }
    }

    fn on_close(&self, generation: u64, code: Option<u16>, reason: String) {
        let dropped = {
            let mut state = self.lock_state();
            if !state.is_current(generation) {
                tracing::debug!(generation, "ignoring close from stale transport");
                return;
            }
            state.connection = None;
            state.last_message = None;
            state.registry.clear()
        };
        tracing::info!(generation, code = ?code, reason = %reason, dropped_subscribers = dropped, "websocket disconnected");
        self.events.publish(LifecycleEvent::Disconnected {
            generation,
            code,
            reason,
            timestamp: Utc::now(),
        });
    }

    fn on_error(&self, generation: u64, message: String) {
        if !self.lock_state().is_current(generation) {
            tracing::debug!(generation, error = %message, "ignoring error from stale transport");
            return;
        }
        tracing::error!(generation, error = %message, "websocket error");
        self.events.publish(LifecycleEvent::TransportError {
            generation,
            message,
            timestamp: Utc::now(),
        });
    }
}

impl EventTarget for HubInner {
    fn handle_event(&self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(generation),
            TransportEvent::Message(text) => self.on_message(generation, &text),
            TransportEvent::Close { code, reason } => self.on_close(generation, code, reason),
            TransportEvent::Error(message) => self.on_error(generation, message),
        }
    }
}
