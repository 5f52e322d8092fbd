//! Reconnect policy

use std::time::Duration;

/// Backoff doubles per attempt until it reaches `base * 2^MAX_BACKOFF_EXPONENT`
pub const MAX_BACKOFF_EXPONENT: u32 = 3;

/// How the client retries a lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Retries after which the client gives up
    pub max_attempts: u32,
    /// Upper bound on opening one transport
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay * 2u32.pow(exponent)
    }

    /// Whether another retry is allowed after `attempts` have been made
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
