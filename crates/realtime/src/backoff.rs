//! Reconnection backoff policy.
//!
//! Pure delay computation, no state beyond configuration. The attempt
//! counter itself lives in the connection manager and resets only on a
//! successful transition to Open.

use std::time::Duration;

use crate::config::RealtimeConfig;

/// Exponential backoff with a hard cap.
///
/// `next_delay(n) == min(base * 2^n, max)`. The sequence is exact — no
/// jitter — because collaborators observe and assert on it.
#[derive(Debug, Clone)]
pub struct ReconnectionPolicy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ReconnectionPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            config.base_reconnect_delay,
            config.max_reconnect_delay,
            config.max_reconnect_attempts,
        )
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        // 2^attempt in u128 millis; anything past the cap saturates anyway.
        let shift = attempt.min(64);
        let millis = (self.base.as_millis().max(1))
            .saturating_mul(1u128 << shift)
            .min(self.max.as_millis());
        Duration::from_millis(millis as u64)
    }

    /// True once `attempt` reaches the configured limit. The manager stops
    /// scheduling retries and reports exhaustion exactly once.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
