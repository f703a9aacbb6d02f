//! WebSocket transport configuration and errors

use std::time::Duration;
use thiserror::Error;

/// Floor below which a pong timeout is ignored and the default kept.
const MIN_PONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport configuration.
///
/// The ping interval is always 0.9 × the pong timeout, so a healthy peer
/// refreshes the read deadline before it can expire.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Message sent immediately after a successful dial (re-sent on every
    /// reconnect, re-establishing the subscription).
    pub handshake: Option<String>,
    /// Extra HTTP headers for the upgrade request.
    pub headers: Vec<(String, String)>,
    /// Deadline for any single write.
    pub write_timeout: Duration,
    /// Read deadline; refreshed on each pong.
    pub pong_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            handshake: None,
            headers: Vec::new(),
            write_timeout: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

impl WsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake payload.
    pub fn handshake(mut self, payload: impl Into<String>) -> Self {
        self.handshake = Some(payload.into());
        self
    }

    /// Add an HTTP header to the upgrade request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    /// Set the pong timeout (and with it the ping interval). Values at or
    /// below five seconds are ignored.
    pub fn pong_timeout(mut self, d: Duration) -> Self {
        if d > MIN_PONG_TIMEOUT {
            self.pong_timeout = d;
        }
        self
    }

    pub fn ping_interval(&self) -> Duration {
        self.pong_timeout.mul_f64(0.9)
    }
}

/// Transport errors surfaced to the dialer. Mid-session failures are not
/// errors to the caller; they trigger reconnection.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid header {0}")]
    Header(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WsConfig::default();
        assert_eq!(config.write_timeout, Duration::from_secs(15));
        assert_eq!(config.pong_timeout, Duration::from_secs(30));
        assert_eq!(config.ping_interval(), Duration::from_secs(27));
        assert!(config.handshake.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let config = WsConfig::new()
            .handshake(r#"{"op":"subscribe"}"#)
            .header("User-Agent", "trendbot")
            .write_timeout(Duration::from_secs(5))
            .pong_timeout(Duration::from_secs(20));

        assert_eq!(config.handshake.as_deref(), Some(r#"{"op":"subscribe"}"#));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.pong_timeout, Duration::from_secs(20));
        assert_eq!(config.ping_interval(), Duration::from_secs(18));
    }

    #[test]
    fn test_too_small_pong_timeout_is_ignored() {
        let config = WsConfig::new().pong_timeout(Duration::from_secs(3));
        assert_eq!(config.pong_timeout, Duration::from_secs(30));
    }
}
