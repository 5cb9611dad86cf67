//! WebSocket frame types: outbound requests and inbound stream markers.

use serde::Serialize;
use serde_json::Value;

/// Default token budget for streaming generation requests.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 50;

/// Client → server prediction request.
///
/// Serializes to `{"text": ..., "additional_context": ...}` with the
/// fields in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionRequest {
    /// Input text to score.
    pub text: String,
    /// Free-form context accompanying the text (may be empty).
    pub additional_context: String,
}

impl PredictionRequest {
    /// Builds a request from borrowed parts.
    #[must_use]
    pub fn new(text: &str, additional_context: &str) -> Self {
        Self {
            text: text.to_owned(),
            additional_context: additional_context.to_owned(),
        }
    }
}

/// Client → server streaming text-generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    /// Prompt text.
    pub text: String,
    /// Request kind discriminator, always `"text-generation"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Always `true`: tokens are streamed back one frame at a time.
    pub stream: bool,
    /// Upper bound on generated tokens.
    pub max_new_tokens: u32,
}

impl GenerationRequest {
    /// Builds a streaming request for `prompt`.
    #[must_use]
    pub fn new(prompt: &str, max_new_tokens: u32) -> Self {
        Self {
            text: prompt.to_owned(),
            kind: "text-generation",
            stream: true,
            max_new_tokens,
        }
    }
}

/// Classification of an inbound frame in a streaming exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame<'a> {
    /// `{"type": "stream_start", ...}`
    Start,
    /// `{"type": "token", "token": "..."}`
    Token(&'a str),
    /// `{"type": "stream_end", ...}`
    End,
    /// Anything else, including non-streaming messages.
    Other,
}

impl<'a> StreamFrame<'a> {
    /// Classifies an inbound message by its `type` field.
    ///
    /// A `token` frame without a string `token` field is treated as `Other`.
    #[must_use]
    pub fn classify(message: &'a Value) -> Self {
        match message.get("type").and_then(Value::as_str) {
            Some("stream_start") => Self::Start,
            Some("stream_end") => Self::End,
            Some("token") => message
                .get("token")
                .and_then(Value::as_str)
                .map_or(Self::Other, Self::Token),
            _ => Self::Other,
        }
    }
}
