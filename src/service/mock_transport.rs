//! In-memory transport used by the hub tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::HubError;
use crate::ws::subscription::{Subscriber, subscriber};
use crate::ws::transport::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};

#[derive(Debug)]
pub(crate) struct MockTransport {
    state: AtomicU8,
    sent: Mutex<Vec<String>>,
    close_requested: AtomicBool,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ReadyState::Connecting.as_u8()),
            sent: Mutex::new(Vec::new()),
            close_requested: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send_text(&self, text: String) -> Result<(), HubError> {
        if self.ready_state() != ReadyState::Open {
            return Err(HubError::NotConnected);
        }
        self.sent
            .lock()
            .map(|mut sent| sent.push(text))
            .map_err(|_| HubError::Transport("poisoned".to_string()))
    }

    fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.set_state(ReadyState::Closing);
    }
}

/// One transport handed out by [`MockFactory`], with the sink to drive it.
#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    pub(crate) url: String,
    pub(crate) sink: EventSink,
    pub(crate) transport: Arc<MockTransport>,
}

impl MockConnection {
    pub(crate) fn open(&self) {
        self.transport.set_state(ReadyState::Open);
        self.sink.emit(TransportEvent::Open);
    }

    pub(crate) fn deliver(&self, text: &str) {
        self.sink.emit(TransportEvent::Message(text.to_string()));
    }

    pub(crate) fn fail(&self, message: &str) {
        self.sink.emit(TransportEvent::Error(message.to_string()));
    }

    pub(crate) fn close(&self) {
        self.transport.set_state(ReadyState::Closed);
        self.sink.emit(TransportEvent::Close {
            code: Some(1000),
            reason: String::new(),
        });
    }
}

type OpenHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub(crate) struct MockFactory {
    opened: Mutex<Vec<MockConnection>>,
    fail_next: AtomicBool,
    during_open: Mutex<Option<OpenHook>>,
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFactory")
            .field("opened", &self.connections().len())
            .finish_non_exhaustive()
    }
}

impl MockFactory {
    /// Runs `hook` inside the next `open`, before the transport is returned.
    pub(crate) fn run_during_next_open<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Ok(mut slot) = self.during_open.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn connections(&self) -> Vec<MockConnection> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    #[allow(clippy::panic)]
    pub(crate) fn last(&self) -> MockConnection {
        let Some(conn) = self.connections().pop() else {
            panic!("no transport has been opened");
        };
        conn
    }
}

impl TransportFactory for MockFactory {
    fn open(&self, url: &str, sink: EventSink) -> Result<Arc<dyn Transport>, HubError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(HubError::Transport("refused by test".to_string()));
        }
        let transport = Arc::new(MockTransport::new());
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(MockConnection {
                url: url.to_string(),
                sink,
                transport: Arc::clone(&transport),
            });
        }
        let hook = self.during_open.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook();
        }
        Ok(transport as Arc<dyn Transport>)
    }
}

/// Messages captured by a [`recorder`] subscriber.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorded(Arc<Mutex<Vec<Value>>>);

impl Recorded {
    /// Drains everything captured so far.
    pub(crate) fn take(&self) -> Vec<Value> {
        self.0
            .lock()
            .map(|mut seen| std::mem::take(&mut *seen))
            .unwrap_or_default()
    }
}

/// A subscriber that records every message it is given.
pub(crate) fn recorder() -> (Subscriber, Recorded) {
    let recorded = Recorded::default();
    let sink = Arc::clone(&recorded.0);
    let callback = subscriber(move |message| {
        if let Ok(mut seen) = sink.lock() {
            seen.push(message.clone());
        }
        Ok(())
    });
    (callback, recorded)
}
