//! Job redelivery policy with backoff and jitter.
//!
//! Applies to whole jobs, not individual channels: a job that errors out of
//! the consumer is rescheduled with exponential backoff until the attempt
//! budget is exhausted, then dead-lettered. Jitter is bounded so that
//! consecutive delays never decrease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Redelivery policy for failed jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Ceiling on any single delay.
    pub max_delay: Duration,

    /// Jitter fraction in `[0.0, 1.0)` applied to each delay.
    ///
    /// Kept below 1/3 by `Default` so exponential delays stay monotonic:
    /// `base * 2^(n-1) * (1 + j)` never exceeds `base * 2^n * (1 - j)`.
    pub jitter_factor: f64,

    /// Strategy for growing delays between attempts.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.2,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Strategy for calculating redelivery delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between attempts.
    Fixed,
    /// Delay doubles each attempt.
    Exponential,
}

/// Result of a retry decision for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redeliver no earlier than the given time.
    Retry {
        /// When the next attempt may run.
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempt budget exhausted; dead-letter the job.
    GiveUp {
        /// Why redelivery stopped.
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether a job failing on `attempt` (1-based) is redelivered.
    pub fn decide(&self, attempt: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };

        RetryDecision::Retry { next_attempt_at: failed_at + chrono_delay }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay * 2_u32.saturating_pow(exponent)
            },
        };

        let capped = base.min(self.max_delay);
        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` to spread redelivery load.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
