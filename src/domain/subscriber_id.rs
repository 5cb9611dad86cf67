//! Subscriber identifier handed out by the hub.

use std::fmt;

/// Key of one registered subscriber.
///
/// Issued once when a callback handle is first registered and used for
/// `unsubscribe`. Registering the same handle again yields the same ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(uuid::Uuid);

impl SubscriberId {
    /// Draws a fresh random (v4) ID.
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
