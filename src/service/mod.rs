//! Service layer: the connection hub and the helpers built on it.

pub mod hub;
#[cfg(test)]
pub(crate) mod mock_transport;
pub mod streaming;

pub use hub::{ConnectionHub, ConnectionState, HubOptions, Subscription};
pub use streaming::StreamHandlers;
