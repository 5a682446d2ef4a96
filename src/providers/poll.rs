//! Polling schedule for long-running predictions.
//!
//! Exponential backoff between status checks, capped per delay and in the
//! number of checks. The overall provider timeout still bounds the whole
//! call; this only keeps the poll loop from hammering the API.
//!
//! ```rust
//! # use plating::providers::PollConfig;
//! # use std::time::Duration;
//! let config = PollConfig::new()
//!     .max_attempts(20)
//!     .initial_delay(Duration::from_millis(250));
//! assert_eq!(config.delay_for_attempt(2), Duration::from_secs(1));
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Status checks before giving up. Default: 30.
    pub max_attempts: u32,
    /// Delay before the first check. Default: 500ms.
    pub initial_delay: Duration,
    /// Upper bound for any single delay. Default: 5s.
    pub max_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before check number `attempt` (0-indexed):
    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}
