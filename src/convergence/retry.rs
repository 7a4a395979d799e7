//! Retry policy with backoff for transient store errors.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl BackoffStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Controls how many times a transient failure is retried within one
/// attempt and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, strategy: BackoffStrategy, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            strategy,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, BackoffStrategy::Fixed, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether the given retry number (0-indexed) is within the budget.
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries
    }

    /// Delay before the given retry (0-indexed), capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry.saturating_add(1)),
            BackoffStrategy::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(retry)),
        };
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// 5 retries, exponential backoff from 100ms.
    fn default() -> Self {
        RetryPolicy::new(5, BackoffStrategy::Exponential, Duration::from_millis(100))
    }
}
