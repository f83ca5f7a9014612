//! Reconnect policy and exponential backoff

use std::time::Duration;

/// Policy for automatic reconnection after an unexpected connection loss.
///
/// Controls how many automatic attempts are made and how long to wait
/// between them; the delay doubles with each attempt.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts
    pub max_attempts: u32,
    /// Delay before the first attempt (doubles each attempt)
    pub base_delay: Duration,
    /// Settle delay between disconnect and connect on a manual reconnect
    pub settle_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Compute the backoff delay before the given attempt (1-based).
///
/// Attempt 1 waits `base_delay`, attempt 2 twice that, and so on:
/// `base_delay * 2^(attempt - 1)`.
#[must_use]
pub fn delay_for_attempt(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
