use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff over consecutive failures of a worker loop.
///
/// The first failure waits the floor, each further consecutive failure
/// doubles the wait (per the configured multiplier) until the ceiling.
/// Callers must [`reset`](Backoff::reset) as soon as the loop makes progress
/// so a later failure starts again from the floor.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryConfig) -> Self {
        Self { policy, failures: 0 }
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.calculate_delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Return to the floor value after a successful fetch
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
