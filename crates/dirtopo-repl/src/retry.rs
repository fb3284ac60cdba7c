//! Bounded retry with exponential backoff for replica initialization.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how patiently a busy consumer is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included (default: 5).
    pub max_attempts: u32,
    /// Backoff before the second attempt (default: 1 second).
    pub initial_backoff: Duration,
    /// Upper bound on any backoff (default: 60 seconds).
    pub max_backoff: Duration,
    /// Multiplier applied per attempt (default: 2.0).
    pub backoff_multiplier: f64,
    /// Add up to half the backoff again as random jitter (default: true).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` and no jitter, for predictable schedules.
    pub fn fixed(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            jitter: false,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let exponent = retry.min(i32::MAX as u32) as i32;
        let capped = (base_ms * self.backoff_multiplier.powi(exponent)).min(max_ms);

        if self.jitter && capped >= 2.0 {
            let extra = rand::thread_rng().gen_range(0..=(capped as u64 / 2));
            Duration::from_millis((capped as u64).saturating_add(extra))
        } else {
            Duration::from_millis(capped as u64)
        }
    }

    /// True while another attempt is allowed after `attempts` made.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
