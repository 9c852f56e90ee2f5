//! Global attempt throttle.
//!
//! Caps how often attempts are issued against the remote service across all
//! in-flight requests, independent of each request's own backoff. Correlated
//! retries from many requests are spread out instead of arriving together.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tracing::trace;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThrottleError {
    #[error("attempts_per_second must be a finite number >= 0, got {0}")]
    InvalidRate(f64),

    /// `1 / rate` is zero or does not fit in a `Duration`.
    #[error("attempts_per_second {0} has no representable issuance period")]
    PeriodOutOfRange(f64),
}

pub struct AttemptThrottle {
    limiter: DirectLimiter,
    period: Duration,
}

impl AttemptThrottle {
    /// Throttle to `rate` attempts per second, one at a time.
    ///
    /// `Ok(None)` when `rate == 0` (throttling disabled).
    pub fn per_second(rate: f64) -> Result<Option<Self>, ThrottleError> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(ThrottleError::InvalidRate(rate));
        }
        if rate == 0.0 {
            return Ok(None);
        }

        let period = Duration::try_from_secs_f64(rate.recip())
            .map_err(|_| ThrottleError::PeriodOutOfRange(rate))?;
        let quota = Quota::with_period(period).ok_or(ThrottleError::PeriodOutOfRange(rate))?;

        Ok(Some(Self {
            limiter: RateLimiter::direct(quota),
            period,
        }))
    }

    /// Minimum spacing between two issued attempts.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until the next attempt may be issued.
    pub async fn acquire(&self) {
        if self.limiter.check().is_ok() {
            return;
        }
        trace!(period_ms = self.period.as_millis() as u64, "attempt throttled");
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for AttemptThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptThrottle")
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}
