//! Backoff schedule for vendor HTTP calls
//!
//! Wait before retry `n` is `initial_backoff_ms * multiplier^(n-1)`, capped
//! at `max_backoff_ms` and spread by up to a quarter either way when jitter
//! is on.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Statuses worth another attempt; anything else fails the request
    #[serde(default = "default_statuses")]
    pub statuses: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            statuses: default_statuses(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt per request
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether request attempt `attempt` (1-based) may be followed by another
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Wait before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let ms = (self.initial_backoff_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_backoff_ms as f64);

        let ms = if self.jitter && ms > 0.0 {
            let spread = ms / 4.0;
            (ms + rand::thread_rng().gen_range(-spread..=spread)).max(0.0)
        } else {
            ms
        };

        Duration::from_millis(ms as u64)
    }
}

/// `Retry-After` given in whole seconds; HTTP dates fall back to backoff
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
