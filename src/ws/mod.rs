//! WebSocket layer: transport seam, tungstenite client, frames, subscribers.
//!
//! The hub in [`crate::service`] owns the state; this module provides the
//! pieces it is assembled from.

pub mod connection;
pub mod messages;
pub mod subscription;
pub mod transport;

pub use connection::TungsteniteFactory;
pub use subscription::{Subscriber, subscriber};
pub use transport::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};
