//! Domain layer: identifiers and the lifecycle event system.
//!
//! Holds the types shared by the hub and the transport: subscriber
//! identity, lifecycle events, and the broadcast bus that carries them.

pub mod event_bus;
pub mod lifecycle_event;
pub mod subscriber_id;

pub use event_bus::EventBus;
pub use lifecycle_event::LifecycleEvent;
pub use subscriber_id::SubscriberId;
