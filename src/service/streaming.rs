//! Streaming text generation over the shared connection.
//!
//! A generation request is answered by a run of frames tagged
//! `stream_start`, `token`, and `stream_end`. [`ConnectionHub::send_generation_stream`]
//! routes those frames to [`StreamHandlers`] through a temporary subscriber
//! that removes itself when the stream ends.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use super::hub::{ConnectionHub, Subscription};
use crate::error::HubError;
use crate::ws::messages::{GenerationRequest, StreamFrame};
use crate::ws::subscription::subscriber;

/// Callback receiving a whole `stream_start` or `stream_end` frame.
pub type FrameCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback receiving one generated token.
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional callbacks for one streaming exchange.
#[derive(Clone, Default)]
pub struct StreamHandlers {
    on_start: Option<FrameCallback>,
    on_token: Option<TokenCallback>,
    on_end: Option<FrameCallback>,
}

impl StreamHandlers {
    /// Creates an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the `stream_start` frame.
    #[must_use]
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called with the `token` field of every `token` frame.
    #[must_use]
    pub fn on_token<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_token = Some(Arc::new(f));
        self
    }

    /// Called with the `stream_end` frame, just before the temporary
    /// subscriber is removed.
    #[must_use]
    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(f));
        self
    }

    fn dispatch(&self, message: &Value) -> bool {
        match StreamFrame::classify(message) {
            StreamFrame::Start => {
                if let Some(f) = &self.on_start {
                    f(message);
                }
                false
            }
            StreamFrame::Token(token) => {
                if let Some(f) = &self.on_token {
                    f(token);
                }
                false
            }
            StreamFrame::End => {
                if let Some(f) = &self.on_end {
                    f(message);
                }
                true
            }
            StreamFrame::Other => false,
        }
    }
}

impl fmt::Debug for StreamHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandlers")
            .field("on_start", &self.on_start.is_some())
            .field("on_token", &self.on_token.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

impl ConnectionHub {
    /// Sends a streaming generation request and routes the reply frames to
    /// `handlers`.
    ///
    /// The returned [`Subscription`] is already removed once `stream_end`
    /// arrives; unsubscribing it earlier abandons the stream.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] if there is no open connection, or
    /// the transport's error if the request could not be written. No
    /// subscriber is left behind in either case.
    pub fn send_generation_stream(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        handlers: StreamHandlers,
    ) -> Result<Subscription, HubError> {
        if !self.is_open() {
            tracing::error!("can't start generation stream: websocket not connected");
            return Err(HubError::NotConnected);
        }
        let frame = serde_json::to_string(&GenerationRequest::new(prompt, max_new_tokens))?;

        let own: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());
        let slot = Arc::clone(&own);
        let callback = subscriber(move |message| {
            if handlers.dispatch(message)
                && let Some(subscription) = slot.get()
            {
                subscription.unsubscribe();
            }
            Ok(())
        });

        let subscription = self.subscribe(callback, false);
        let _ = own.set(subscription.clone());

        if let Err(err) = self.send_frame(frame) {
            subscription.unsubscribe();
            return Err(err);
        }
        tracing::debug!(subscriber_id = %subscription.id(), max_new_tokens, "generation stream requested");
        Ok(subscription)
    }
}
