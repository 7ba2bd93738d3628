//! Request throttling for vendor sources
//!
//! Two constraints are enforced at once:
//! - a minimum fixed delay between consecutive requests
//! - a rolling ceiling of requests per hour
//!
//! Hitting the hourly ceiling is not an error: `acquire` sleeps until the
//! oldest request in the window ages out, then lets the caller proceed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const HOUR: Duration = Duration::from_secs(3600);

/// Vendor-imposed request budget
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum delay between consecutive requests
    #[serde(default)]
    pub min_delay_ms: u64,

    /// Rolling hourly ceiling; `None` means unlimited
    #[serde(default)]
    pub max_requests_per_hour: Option<u32>,
}

impl RateLimitConfig {
    pub fn new(min_delay_ms: u64, max_requests_per_hour: Option<u32>) -> Self {
        Self {
            min_delay_ms,
            max_requests_per_hour,
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Counters exposed for the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitStats {
    pub requests: u64,
    pub hourly_pauses: u64,
    pub paused_for: Duration,
}

pub struct RateLimiter {
    min_delay: Duration,
    max_per_window: Option<usize>,
    window: Duration,
    last_request: Option<Instant>,
    recent: VecDeque<Instant>,
    stats: RateLimitStats,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_per_window: config.max_requests_per_hour.map(|n| n as usize),
            window: HOUR,
            last_request: None,
            recent: VecDeque::new(),
            stats: RateLimitStats::default(),
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        self.stats
    }

    /// Wait until one more request is allowed, then record it.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();

            if let Some(last) = self.last_request {
                let ready_at = last + self.min_delay;
                if now < ready_at {
                    sleep_until(ready_at).await;
                    continue;
                }
            }

            while let Some(&oldest) = self.recent.front() {
                if oldest + self.window <= now {
                    self.recent.pop_front();
                } else {
                    break;
                }
            }

            if let (Some(max), Some(&oldest)) = (self.max_per_window, self.recent.front()) {
                if self.recent.len() >= max {
                    let resume_at = oldest + self.window;
                    let wait = resume_at - now;
                    info!(
                        requests_in_window = self.recent.len(),
                        ceiling = max,
                        wait_secs = wait.as_secs(),
                        "Hourly request ceiling reached, pausing until the window resets"
                    );
                    self.stats.hourly_pauses += 1;
                    self.stats.paused_for += wait;
                    sleep_until(resume_at).await;
                    continue;
                }
            }

            self.recent.push_back(now);
            if let Some(max) = self.max_per_window {
                // Only the last `max` instants can ever gate a request
                while self.recent.len() > max {
                    self.recent.pop_front();
                }
            }
            self.last_request = Some(now);
            self.stats.requests += 1;
            debug!(requests = self.stats.requests, "Request slot acquired");
            return;
        }
    }
}
