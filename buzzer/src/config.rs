use std::time::Duration;

use crate::transport::Endpoint;

/// Address the web client talks to when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Settings for [`crate::client::BuzzerClient::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// How long a correlated request may wait for its reply. `None` waits
    /// until the reply arrives or the connection closes.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Endpoint::WebSocket(DEFAULT_ENDPOINT.to_string()))
    }
}
