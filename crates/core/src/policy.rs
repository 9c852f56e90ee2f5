//! Retry policy: how backoff grows and when retrying stops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first retryable failure.
    pub initial_interval: Duration,
    /// Growth factor applied per attempt (1.0 = fixed interval).
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay.
    pub maximum_interval: Duration,
    /// Maximum number of attempts (0 = unbounded by count).
    pub maximum_attempts: u32,
    /// Schedule-to-close bound, measured from the first attempt.
    pub maximum_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 1.5,
            maximum_interval: Duration::from_secs(60),
            maximum_attempts: 0,
            maximum_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval policy bounded by attempt count.
    pub fn fixed(interval: Duration, maximum_attempts: u32) -> Self {
        Self {
            initial_interval: interval,
            backoff_coefficient: 1.0,
            maximum_interval: interval,
            maximum_attempts,
            maximum_elapsed: None,
        }
    }

    /// Same policy, capped by an overall elapsed-time budget.
    pub fn with_maximum_elapsed(mut self, budget: Duration) -> Self {
        self.maximum_elapsed = Some(budget);
        self
    }

    /// Backoff after the failure of attempt `attempt` (0-indexed):
    /// `min(initial × coefficient^attempt, maximum_interval)`.
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let max_secs = self.maximum_interval.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);

        if !secs.is_finite() || secs >= max_secs {
            self.maximum_interval
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// True once `attempts_made` reaches a bounded `maximum_attempts`.
    pub fn attempts_exhausted(&self, attempts_made: u32) -> bool {
        self.maximum_attempts != 0 && attempts_made >= self.maximum_attempts
    }

    /// True once `elapsed` has used up the elapsed-time budget (if any).
    pub fn elapsed_exhausted(&self, elapsed: Duration) -> bool {
        self.maximum_elapsed.is_some_and(|budget| elapsed >= budget)
    }

    /// Reject policies that could never terminate or never back off sanely.
    pub fn validate(&self) -> DomainResult<()> {
        if self.initial_interval.is_zero() {
            return Err(DomainError::validation("initial_interval must be > 0"));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(DomainError::validation("backoff_coefficient must be >= 1.0"));
        }
        if self.maximum_interval < self.initial_interval {
            return Err(DomainError::validation(
                "maximum_interval must be >= initial_interval",
            ));
        }
        if self.maximum_attempts == 0 && self.maximum_elapsed.is_none() {
            return Err(DomainError::validation(
                "an unbounded attempt count requires maximum_elapsed",
            ));
        }
        Ok(())
    }
}
