// SPDX-License-Identifier: Apache-2.0

use std::cmp::min;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_elapsed_time: Duration::from_secs(300),
        }
    }
}

/// Exponential backoff with jitter for one delivery attempt sequence.
#[derive(Debug)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    start: Instant,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current: config.initial_backoff,
            config,
            start: Instant::now(),
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` once waiting would exceed the
    /// maximum elapsed time.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;

        let backoff_ms = self.current.as_millis() as i64;

        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        let jitter = (rand::random::<i64>() % v) - (v / 2);
        let mut sleep_ms = backoff_ms + jitter;
        if sleep_ms < 0 {
            sleep_ms = 1;
        }
        let delay = Duration::from_millis(sleep_ms as u64);

        if Instant::now() + delay > self.start + self.config.max_elapsed_time {
            return None;
        }

        self.current = min(self.current * 2, self.config.max_backoff);
        Some(delay)
    }
}
