//! Connection lifecycle events.
//!
//! Every transport state change observed by the hub is published as a
//! [`LifecycleEvent`] through the [`super::EventBus`]. Inbound application
//! messages never travel this way; they go to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle event emitted by the hub.
///
/// `generation` identifies the connection instance the event belongs to;
/// it increases by one for every transport the hub opens.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The transport finished its handshake and is open.
    Connected {
        /// Connection generation.
        generation: u64,
        /// Full endpoint URL the transport was opened against.
        url: String,
        /// Time the open was observed.
        timestamp: DateTime<Utc>,
    },

    /// The transport closed; subscribers and the cached message were reset.
    Disconnected {
        /// Connection generation.
        generation: u64,
        /// WebSocket close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
        /// Time the close was observed.
        timestamp: DateTime<Utc>,
    },

    /// The transport reported an error. A `Disconnected` event usually follows.
    TransportError {
        /// Connection generation.
        generation: u64,
        /// Error description from the transport.
        message: String,
        /// Time the error was observed.
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Returns the connection generation associated with this event.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Connected { generation, .. }
            | Self::Disconnected { generation, .. }
            | Self::TransportError { generation, .. } => *generation,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::TransportError { .. } => "transport_error",
        }
    }
}
