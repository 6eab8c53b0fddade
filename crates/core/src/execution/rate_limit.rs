use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Sliding-window throttle on outbound environment calls.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStatus {
    pub max_calls: usize,
    pub window_seconds: f64,
    pub calls_in_window: usize,
    pub calls_per_second: f64,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self { max_calls: max_calls.max(1), window, calls: Mutex::new(VecDeque::new()) }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_calls, Duration::from_secs(config.window_seconds))
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while calls.front().is_some_and(|oldest| now.duration_since(*oldest) >= window) {
            calls.pop_front();
        }
    }

    /// Waits until a call fits in the window, then records it. Never rejects.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                Self::prune(&mut calls, now, self.window);

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(
                event_name = "engine.rate_limit.waiting",
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for window to slide"
            );
            sleep(wait).await;
        }
    }

    /// Records a call only when one fits right now.
    pub async fn try_acquire(&self) -> bool {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        Self::prune(&mut calls, now, self.window);

        if calls.len() < self.max_calls {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls per second over the current window.
    pub async fn current_rate(&self) -> f64 {
        self.status().await.calls_per_second
    }

    pub async fn status(&self) -> RateLimiterStatus {
        let mut calls = self.calls.lock().await;
        Self::prune(&mut calls, Instant::now(), self.window);
        let window_seconds = self.window.as_secs_f64();
        let calls_per_second =
            if window_seconds > 0.0 { calls.len() as f64 / window_seconds } else { 0.0 };

        RateLimiterStatus {
            max_calls: self.max_calls,
            window_seconds,
            calls_in_window: calls.len(),
            calls_per_second,
        }
    }
}
