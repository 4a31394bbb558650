use std::time::Duration;

use cryptics_metadata::{ConnectConfig, ProducerConfig};

/// Bounded exponential backoff: the delay doubles after every failed
/// attempt, capped at `max_delay`, for at most `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_delay: max_delay.max(initial),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn for_producer(config: &ProducerConfig) -> Self {
        let (config, _) = config.clone().validated();
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.max_attempts,
        )
    }

    /// Submission retries double from `submit_backoff_ms` up to the ready budget
    pub fn for_submission(config: &ConnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.submit_backoff_ms),
            Duration::from_millis(config.ready_timeout_ms),
            config.submit_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max_delay)
    }
}
