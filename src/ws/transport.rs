//! Transport abstraction.
//!
//! The hub never talks to a socket directly. A [`TransportFactory`] opens a
//! [`Transport`] and reports everything that happens to it through the
//! [`EventSink`] it was handed. The tungstenite client in
//! [`super::connection`] is the default; tests plug in in-memory doubles.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::HubError;

/// Transport readiness, mirroring the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Close requested, not yet confirmed.
    Closing,
    /// Closed or failed to open.
    Closed,
}

impl ReadyState {
    /// Decodes the compact representation stored in atomics.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Encodes the state for storage in an atomic.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The transport is closed; no further events follow.
    Close {
        /// Close code, if one was received.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },
    /// The transport reported an error.
    Error(String),
}

/// An open (or opening) message-framed connection.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Queues one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] if the transport is not open, or
    /// [`HubError::Transport`] if the frame could not be queued.
    fn send_text(&self, text: String) -> Result<(), HubError>;

    /// Requests closure. The transport reports [`TransportEvent::Close`]
    /// once it is done.
    fn close(&self);
}

/// Opens transports.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Starts opening a transport to `url`.
    ///
    /// Events must be reported through `sink` in the order they occur.
    /// Implementations must not call [`EventSink::emit`] before this method
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the transport cannot be started
    /// at all (e.g. no async runtime is available).
    fn open(&self, url: &str, sink: EventSink) -> Result<Arc<dyn Transport>, HubError>;
}

/// Receiver side of an [`EventSink`].
pub(crate) trait EventTarget: Send + Sync {
    fn handle_event(&self, generation: u64, event: TransportEvent);
}

/// Delivers transport events to the hub that opened the transport.
///
/// Each sink is bound to one connection generation; events emitted after
/// the hub has moved on to a newer connection are ignored by the hub.
#[derive(Clone)]
pub struct EventSink {
    target: Weak<dyn EventTarget>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(target: Weak<dyn EventTarget>, generation: u64) -> Self {
        Self { target, generation }
    }

    /// Reports an event. Returns `false` if the hub no longer exists.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.target.upgrade() {
            Some(target) => {
                target.handle_event(self.generation, event);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("attached", &(self.target.strong_count() > 0))
            .finish()
    }
}
