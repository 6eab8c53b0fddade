use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::errors::ExecutionFailure;

/// Upper bound of the random jitter added to each delay, as a fraction of it.
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff with capped delay and tag-based retryability.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_base: config.backoff_base,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// `min(initial * base^attempt, max)` plus up to 10% random jitter.
    pub fn get_retry_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        base + base.mul_f64(jitter)
    }

    pub fn is_retryable(&self, error: &ExecutionFailure) -> bool {
        error.kind.is_transient()
    }

    pub fn should_retry(&self, attempt: u32, error: &ExecutionFailure) -> bool {
        attempt < self.max_retries && self.is_retryable(error)
    }
}
