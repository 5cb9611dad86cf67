//! # ws-hub
//!
//! A shared WebSocket connection with a publish/subscribe fan-out layer for
//! inbound JSON messages, plus same-origin endpoint resolution.
//!
//! One [`ConnectionHub`] owns at most one live transport. Every inbound
//! message is parsed as JSON, cached as the last message, and handed to
//! every registered subscriber. When the transport closes, the subscribers
//! and the cache are reset together.
//!
//! ## Architecture
//!
//! ```text
//! Page location ──► EndpointResolver (endpoint)
//!                        │ base URL
//!                        ▼
//!                  ConnectionHub (service/)
//!                   │        │          │
//!     SubscriberRegistry   EventBus   TransportFactory (ws/)
//!        (ws/)           (domain/)        │
//!                                         └── tokio-tungstenite client
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws_hub::{ConnectionHub, EndpointResolver, StaticLocation, TungsteniteFactory, subscriber};
//!
//! # async fn example() -> Result<(), ws_hub::HubError> {
//! let base = EndpointResolver::new(StaticLocation::none()).resolve_url();
//! let hub = ConnectionHub::new(Arc::new(TungsteniteFactory::new()));
//! hub.connect(&base, Some(subscriber(|msg| {
//!     println!("prediction: {msg}");
//!     Ok(())
//! })))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod service;
pub mod ws;

pub use config::HubConfig;
pub use endpoint::{EndpointResolver, LocalPolicy, LocationProvider, PageLocation, StaticLocation};
pub use error::HubError;
pub use service::{ConnectionHub, ConnectionState, HubOptions, StreamHandlers, Subscription};
pub use ws::{Subscriber, TungsteniteFactory, subscriber};
