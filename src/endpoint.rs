//! WebSocket endpoint resolution from the page location.
//!
//! The backend is reached through the same ingress that serves the page,
//! except during local frontend development where the dev server runs on
//! its own port and the backend listens on `localhost:8000`.

use std::fmt;

use url::Url;

use crate::error::HubError;

/// Endpoint used when no page location is known or a dev server is detected.
pub const FALLBACK_ENDPOINT: &str = "ws://localhost:8000";

/// Ports used by the usual frontend dev servers (Astro, CRA/Next, Vite).
pub const DEFAULT_DEV_PORTS: [u16; 3] = [4321, 3000, 5173];

/// The parts of a page URL the resolver looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    protocol: String,
    hostname: String,
    port: Option<u16>,
}

impl PageLocation {
    /// Builds a location from its parts. `protocol` includes the trailing
    /// colon, as in `"https:"`.
    #[must_use]
    pub fn new(protocol: impl Into<String>, hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            protocol: protocol.into(),
            hostname: hostname.into(),
            port,
        }
    }

    /// Parses a full page URL such as `http://localhost:5173/app`.
    ///
    /// Default ports (80 for `http`, 443 for `https`) are reported as absent.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidLocation`] if the URL does not parse or
    /// has no host.
    pub fn parse(page_url: &str) -> Result<Self, HubError> {
        let url = Url::parse(page_url.trim())
            .map_err(|e| HubError::InvalidLocation(format!("'{page_url}': {e}")))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| HubError::InvalidLocation(format!("'{page_url}' has no host")))?;
        Ok(Self::new(format!("{}:", url.scheme()), hostname, url.port()))
    }

    /// Scheme with trailing colon.
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Host name without port.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Explicit port, if any.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Host name plus `:port` when a port is set.
    #[must_use]
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    fn is_loopback(&self) -> bool {
        matches!(self.hostname.as_str(), "localhost" | "127.0.0.1")
    }

    fn ws_scheme(&self) -> &'static str {
        if self.protocol == "https:" { "wss:" } else { "ws:" }
    }
}

impl fmt::Display for PageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}", self.protocol, self.host())
    }
}

/// Source of the current page location.
pub trait LocationProvider: Send + Sync + fmt::Debug {
    /// Returns the location, or `None` outside an interactive page.
    fn location(&self) -> Option<PageLocation>;
}

/// A fixed location, or none at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticLocation(Option<PageLocation>);

impl StaticLocation {
    /// Always reports `location`.
    #[must_use]
    pub const fn new(location: PageLocation) -> Self {
        Self(Some(location))
    }

    /// Never reports a location.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Parses an optional page URL.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidLocation`] if `page_url` is set but invalid.
    pub fn from_page_url(page_url: Option<&str>) -> Result<Self, HubError> {
        page_url
            .map(PageLocation::parse)
            .transpose()
            .map(Self)
    }
}

impl LocationProvider for StaticLocation {
    fn location(&self) -> Option<PageLocation> {
        self.0.clone()
    }
}

/// How a loopback page with a non-default port is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalPolicy {
    /// Listed ports are frontend dev servers and go to the fallback; any
    /// other port is assumed to serve the backend too.
    DevPorts(Vec<u16>),
    /// Every loopback port other than 80 goes to the fallback.
    AnyPort,
}

impl Default for LocalPolicy {
    fn default() -> Self {
        Self::DevPorts(DEFAULT_DEV_PORTS.to_vec())
    }
}

impl LocalPolicy {
    fn uses_fallback(&self, port: u16) -> bool {
        match self {
            Self::DevPorts(ports) => ports.contains(&port),
            Self::AnyPort => true,
        }
    }
}

/// Derives the WebSocket base URL for the current page.
#[derive(Debug, Clone)]
pub struct EndpointResolver<L> {
    provider: L,
    policy: LocalPolicy,
    fallback: String,
}

impl<L: LocationProvider> EndpointResolver<L> {
    /// Creates a resolver with the default dev-port policy and fallback.
    #[must_use]
    pub fn new(provider: L) -> Self {
        Self {
            provider,
            policy: LocalPolicy::default(),
            fallback: FALLBACK_ENDPOINT.to_string(),
        }
    }

    /// Replaces the loopback routing policy.
    #[must_use]
    pub fn with_policy(mut self, policy: LocalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the fallback endpoint.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Resolves the base URL for the provider's current location.
    #[must_use]
    pub fn resolve_url(&self) -> String {
        let location = self.provider.location();
        let resolved = self.resolve_location(location.as_ref());
        match &location {
            Some(page) => tracing::debug!(page = %page, url = %resolved, "resolved websocket endpoint"),
            None => tracing::debug!(url = %resolved, "no page location, using fallback endpoint"),
        }
        resolved
    }

    /// Resolves the base URL for an explicit location.
    #[must_use]
    pub fn resolve_location(&self, location: Option<&PageLocation>) -> String {
        let Some(location) = location else {
            return self.fallback.clone();
        };
        let scheme = location.ws_scheme();

        if location.is_loopback() {
            match location.port() {
                None | Some(80) => return format!("{scheme}//{}", location.hostname()),
                Some(port) if self.policy.uses_fallback(port) => return self.fallback.clone(),
                Some(_) => {}
            }
        }

        format!("{scheme}//{}", location.host())
    }
}
