//! Session configuration for the two client profiles.
//!
//! The web profile speaks RFC-6455 WebSocket frames to the chat endpoint;
//! the mobile profile speaks length-prefixed frames over a raw TCP socket.
//! Both carry the same Noise-encrypted stream above the framing layer.

use std::time::Duration;

/// Fixed endpoints and header values for the live service.
pub mod endpoints {
    /// WebSocket chat endpoint for the web profile.
    pub const WEB_URL: &str = "wss://web.whatsapp.com/ws/chat";
    /// Origin header the web endpoint requires.
    pub const WEB_ORIGIN: &str = "https://web.whatsapp.com";
    /// Host header the web endpoint requires.
    pub const WEB_HOST: &str = "web.whatsapp.com";
    /// TCP endpoint for the mobile profile.
    pub const MOBILE_HOST: &str = "g.whatsapp.net";
    pub const MOBILE_PORT: u16 = 443;
}

/// Which transport profile a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    /// WebSocket transport with Origin/Host headers (companion client).
    Web,
    /// Raw TCP transport with 3-byte length framing (primary client).
    Mobile,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport profile.
    pub profile: ClientProfile,
    /// WebSocket endpoint URL (web profile).
    pub web_url: String,
    /// TCP host (mobile profile).
    pub mobile_host: String,
    /// TCP port (mobile profile).
    pub mobile_port: u16,
    /// Optional `host:port` of an HTTP CONNECT proxy (web profile only).
    pub proxy: Option<String>,
    /// Deadline for a single iq round trip.
    pub request_timeout: Duration,
    /// Deadline for an app-state pull.
    pub sync_pull_timeout: Duration,
    /// Deadline for the Noise handshake and companion pairing.
    pub pairing_timeout: Duration,
    /// Idle window after which a history-sync chunk set is finalized.
    pub history_idle: Duration,
    /// In-protocol keepalive ping interval.
    pub keepalive_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: ClientProfile::Web,
            web_url: endpoints::WEB_URL.to_string(),
            mobile_host: endpoints::MOBILE_HOST.to_string(),
            mobile_port: endpoints::MOBILE_PORT,
            proxy: None,
            request_timeout: Duration::from_secs(60),
            sync_pull_timeout: Duration::from_secs(120),
            pairing_timeout: Duration::from_secs(30),
            history_idle: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Select the transport profile.
    pub fn with_profile(mut self, profile: ClientProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Override the WebSocket endpoint (testing against a local server).
    pub fn with_web_url(mut self, url: impl Into<String>) -> Self {
        self.web_url = url.into();
        self
    }

    /// Override the TCP endpoint (mobile profile).
    pub fn with_mobile_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.mobile_host = host.into();
        self.mobile_port = port;
        self
    }

    /// Route the web transport through an HTTP CONNECT proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Override the iq round-trip deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
