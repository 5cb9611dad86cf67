//! Hub error types.
//!
//! [`HubError`] is the central error type of the crate. Each variant carries
//! a stable numeric code so callers (and log pipelines) can match on it
//! without parsing messages.

/// Error enum for connection, transport, resolver, and configuration failures.
///
/// # Error Code Ranges
///
/// | Range     | Category      |
/// |-----------|---------------|
/// | 1000–1999 | Input         |
/// | 2000–2999 | Connection    |
/// | 3000–3999 | Internal      |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A send was attempted while no open connection exists.
    #[error("websocket not connected")]
    NotConnected,

    /// An outbound frame could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport could not be started or refused a write.
    #[error("transport error: {0}")]
    Transport(String),

    /// A page location could not be parsed.
    #[error("invalid page location: {0}")]
    InvalidLocation(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidLocation(_) => 1001,
            Self::InvalidConfig(_) => 1002,
            Self::NotConnected => 2001,
            Self::Transport(_) => 2002,
            Self::Serialization(_) => 3001,
        }
    }
}
