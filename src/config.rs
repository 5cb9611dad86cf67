//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use crate::endpoint::{DEFAULT_DEV_PORTS, FALLBACK_ENDPOINT, LocalPolicy, StaticLocation};
use crate::error::HubError;
use crate::service::hub::{DEFAULT_EVENT_BUS_CAPACITY, DEFAULT_WS_PATH, HubOptions};

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Page URL the endpoint is derived from. `None` selects the fallback.
    pub page_url: Option<String>,

    /// Path appended to the resolved base URL.
    pub ws_path: String,

    /// Endpoint used when no page is known or a dev server is detected.
    pub fallback_url: String,

    /// Loopback ports treated as frontend dev servers.
    pub dev_ports: Vec<u16>,

    /// Route every non-default loopback port to the fallback.
    pub any_local_port: bool,

    /// Replay the cached message when the printer subscribes.
    pub replay_last: bool,

    /// Context string sent alongside every line read from stdin.
    pub additional_context: String,

    /// Capacity of the lifecycle broadcast channel.
    pub event_bus_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            page_url: None,
            ws_path: DEFAULT_WS_PATH.to_string(),
            fallback_url: FALLBACK_ENDPOINT.to_string(),
            dev_ports: DEFAULT_DEV_PORTS.to_vec(),
            any_local_port: false,
            replay_last: true,
            additional_context: String::new(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
            log_format: LogFormat::Text,
        }
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] if `HUB_DEV_PORTS`,
    /// `HUB_LOCAL_POLICY`, or `LOG_FORMAT` is set to an unusable value.
    pub fn from_env() -> Result<Self, HubError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let page_url = std::env::var("PAGE_URL").ok().filter(|v| !v.trim().is_empty());
        let ws_path = std::env::var("HUB_WS_PATH").unwrap_or(defaults.ws_path);
        let fallback_url = std::env::var("HUB_FALLBACK_URL").unwrap_or(defaults.fallback_url);

        let dev_ports = match std::env::var("HUB_DEV_PORTS") {
            Ok(raw) => parse_ports(&raw)?,
            Err(_) => defaults.dev_ports,
        };

        let any_local_port = match std::env::var("HUB_LOCAL_POLICY").ok().as_deref() {
            None | Some("dev_ports") => false,
            Some("any_port") => true,
            Some(other) => {
                return Err(HubError::InvalidConfig(format!(
                    "HUB_LOCAL_POLICY must be 'dev_ports' or 'any_port', got '{other}'"
                )));
            }
        };

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(HubError::InvalidConfig(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )));
            }
        };

        Ok(Self {
            page_url,
            ws_path,
            fallback_url,
            dev_ports,
            any_local_port,
            replay_last: parse_env_bool("HUB_REPLAY_LAST", defaults.replay_last),
            additional_context: std::env::var("HUB_ADDITIONAL_CONTEXT").unwrap_or_default(),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
            log_format,
        })
    }

    /// Loopback routing policy described by this configuration.
    #[must_use]
    pub fn local_policy(&self) -> LocalPolicy {
        if self.any_local_port {
            LocalPolicy::AnyPort
        } else {
            LocalPolicy::DevPorts(self.dev_ports.clone())
        }
    }

    /// Hub options described by this configuration.
    #[must_use]
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            ws_path: self.ws_path.clone(),
            event_bus_capacity: self.event_bus_capacity,
        }
    }

    /// Location provider for the configured page URL.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidLocation`] if `page_url` does not parse.
    pub fn location(&self) -> Result<StaticLocation, HubError> {
        StaticLocation::from_page_url(self.page_url.as_deref())
    }
}

/// Parses a comma-separated port list. Blank entries are skipped.
fn parse_ports(raw: &str) -> Result<Vec<u16>, HubError> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| HubError::InvalidConfig(format!("invalid port '{p}' in HUB_DEV_PORTS: {e}")))
        })
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
