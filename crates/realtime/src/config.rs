//! Construction-time configuration for the realtime core.
//!
//! The hosting application supplies every knob programmatically; there is no
//! CLI and no environment lookup here.

use std::path::PathBuf;
use std::time::Duration;

/// Errors from configuration validation.
///
/// This is the only failure the public surface reports synchronously;
/// everything at runtime flows through callbacks and state.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint must use ws:// or wss://, got {0:?}")]
    InvalidEndpoint(String),

    #[error("poll endpoint must use http:// or https://, got {0:?}")]
    InvalidPollEndpoint(String),

    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
}

/// How the credential is bound to the channel endpoint.
///
/// Both conventions appear among backend deployments, so both are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenBinding {
    /// Appended as `?token=<value>`.
    QueryParam,
    /// Appended as a trailing path segment, `/<value>`.
    PathSegment,
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Channel endpoint, e.g. `wss://api.huntboard.app/ws`.
    pub endpoint: String,
    /// How the token is attached to the endpoint.
    pub token_binding: TokenBinding,
    /// Reconnect attempts before the session is declared exhausted.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles on each failed attempt.
    pub base_reconnect_delay: Duration,
    /// Cap for the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Interval between liveness pings while the channel is open.
    pub heartbeat_interval: Duration,
    /// How long after a ping a pong must arrive before the channel is
    /// considered dead.
    pub pong_timeout: Duration,
    /// Lead time before credential expiry at which renewal triggers.
    pub refresh_threshold: Duration,
    /// Durable backing file for the offline queue. `None` keeps the queue
    /// in memory only, losing it on process exit.
    pub queue_path: Option<PathBuf>,
    /// Maximum queued messages before further offline sends are dropped.
    pub queue_capacity: usize,
    /// Poll cadence for the degraded HTTP transport.
    pub poll_interval: Duration,
    /// HTTP resource polled by the fallback transport. Required only when
    /// wrapping the manager in a [`FallbackTransport`](crate::FallbackTransport).
    pub poll_endpoint: Option<String>,
}

impl RealtimeConfig {
    /// Creates a configuration for the given endpoint with default knobs.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if let Some(poll) = &self.poll_endpoint
            && !(poll.starts_with("http://") || poll.starts_with("https://"))
        {
            return Err(ConfigError::InvalidPollEndpoint(poll.clone()));
        }
        for (name, d) in [
            ("base_reconnect_delay", self.base_reconnect_delay),
            ("max_reconnect_delay", self.max_reconnect_delay),
            ("heartbeat_interval", self.heartbeat_interval),
            ("pong_timeout", self.pong_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if d.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Builds the channel URL with the token bound per configuration.
    pub(crate) fn channel_url(&self, token: &str) -> String {
        match self.token_binding {
            TokenBinding::QueryParam => format!("{}?token={token}", self.endpoint),
            TokenBinding::PathSegment => {
                format!("{}/{token}", self.endpoint.trim_end_matches('/'))
            }
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/ws".into(),
            token_binding: TokenBinding::QueryParam,
            max_reconnect_attempts: 5,
            base_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            refresh_threshold: Duration::from_secs(60),
            queue_path: None,
            queue_capacity: 512,
            poll_interval: Duration::from_secs(10),
            poll_endpoint: None,
        }
    }
}
