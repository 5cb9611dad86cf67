//! Subscriber registry and isolated dispatch.
//!
//! Tracks the callbacks registered on the hub in registration order and
//! invokes them one at a time so a failing callback never affects the
//! others.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;

use crate::domain::SubscriberId;

/// Callback invoked with every inbound JSON message.
///
/// Returning `Err` or panicking is caught and logged by the hub.
pub type Subscriber = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure into a [`Subscriber`] handle.
///
/// Keep the returned handle around to register the same callback again
/// without creating a duplicate entry.
pub fn subscriber<F>(callback: F) -> Subscriber
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Ordered set of subscribers, unique by callback identity.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: Vec<(SubscriberId, Subscriber)>,
}

impl SubscriberRegistry {
    /// Adds a callback, returning its ID.
    ///
    /// If the same handle (by pointer identity) is already registered,
    /// its existing ID is returned and nothing is added.
    pub(crate) fn insert(&mut self, callback: Subscriber) -> SubscriberId {
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &callback))
        {
            return *id;
        }
        let id = SubscriberId::new();
        self.entries.push((id, callback));
        id
    }

    /// Removes a subscriber. Returns `true` if it was registered.
    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    /// Drops every subscriber, returning how many were removed.
    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Clones the current subscribers in registration order.
    ///
    /// Dispatch iterates the snapshot so callbacks can mutate the registry
    /// while a message is being delivered.
    #[must_use]
    pub(crate) fn snapshot(&self) -> Vec<(SubscriberId, Subscriber)> {
        self.entries
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("ids", &self.entries.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .finish()
    }
}

/// Invokes one subscriber, catching both `Err` results and panics.
///
/// Returns `true` if the callback completed successfully.
pub(crate) fn invoke_isolated(id: SubscriberId, callback: &Subscriber, message: &Value) -> bool {
    match catch_unwind(AssertUnwindSafe(|| callback(message))) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::error!(subscriber_id = %id, error = %err, "subscriber callback failed");
            false
        }
        Err(_) => {
            tracing::error!(subscriber_id = %id, "subscriber callback panicked");
            false
        }
    }
}
