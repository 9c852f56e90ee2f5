//! Time source used by orchestration decisions.
//!
//! Orchestration code never calls `Utc::now()` or `tokio::time::sleep`
//! directly; it goes through a [`Clock`] so that tests can run on virtual time
//! and replays read recorded timestamps instead.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Resolves once `after` has passed. Cuts off in-flight work; unlike
    /// [`sleep`](Self::sleep) it is not a scheduled wait.
    async fn deadline(&self, after: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn deadline(&self, after: Duration) {
        tokio::time::sleep(after).await;
    }
}

/// Virtual clock for tests/dev.
///
/// Sleeping advances virtual time immediately and records the requested
/// duration, so backoff schedules can be asserted exactly. Deadlines wait on
/// the tokio timer (pause it to make them instant) and then advance virtual
/// time by the same amount.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    async fn deadline(&self, after: Duration) {
        tokio::time::sleep(after).await;
        self.advance(after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.sleep(Duration::from_millis(1500)).await;
        clock.advance(Duration::from_millis(500));

        assert_eq!(clock.now() - start, chrono::Duration::seconds(2));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_deadline_is_not_a_recorded_sleep() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.deadline(Duration::from_secs(2)).await;

        assert_eq!(clock.now() - start, chrono::Duration::seconds(2));
        assert!(clock.sleeps().is_empty());
    }
}
