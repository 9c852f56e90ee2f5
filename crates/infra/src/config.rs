//! Orchestrator configuration.
//!
//! One value, built at startup and handed to every component that needs it.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use signet_core::{DomainError, DomainResult, RetryPolicy};

use crate::throttle::AttemptThrottle;

/// Grace period a claimed job gets past the escalated budget before it is
/// considered abandoned.
const STALE_CLAIM_GRACE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Budget of the synchronous fast path when the request carries none.
    pub fast_path_budget: Duration,
    /// Outer bound of an escalated execution.
    pub escalated_budget: Duration,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Client-side timeout of one remote attempt.
    pub attempt_timeout: Duration,
    pub callback_timeout: Duration,
    /// Attempts per second across all executions; `0` disables throttling.
    pub attempts_per_second: f64,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    /// A job claimed longer ago than this is handed to another worker.
    pub stale_claim_after: Duration,
    /// How long a finished execution stays in the journal (and a finished
    /// job in the queue) before it is purged.
    pub retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let escalated_budget = Duration::from_secs(60 * 60);
        Self {
            fast_path_budget: Duration::from_secs(2),
            escalated_budget,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 1.5,
            maximum_interval: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(10),
            callback_timeout: Duration::from_secs(60),
            attempts_per_second: 1.0,
            worker_concurrency: 4,
            poll_interval: Duration::from_millis(100),
            stale_claim_after: escalated_budget.saturating_add(STALE_CLAIM_GRACE),
            retention: Duration::from_secs(15 * 60),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `SIGNET_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_millis(&lookup, "SIGNET_FAST_PATH_BUDGET_MS", &mut config.fast_path_budget);
        override_secs(&lookup, "SIGNET_ESCALATED_BUDGET_SECS", &mut config.escalated_budget);
        override_millis(&lookup, "SIGNET_INITIAL_INTERVAL_MS", &mut config.initial_interval);
        override_parsed(&lookup, "SIGNET_BACKOFF_COEFFICIENT", &mut config.backoff_coefficient);
        override_secs(&lookup, "SIGNET_MAXIMUM_INTERVAL_SECS", &mut config.maximum_interval);
        override_secs(&lookup, "SIGNET_ATTEMPT_TIMEOUT_SECS", &mut config.attempt_timeout);
        override_secs(&lookup, "SIGNET_CALLBACK_TIMEOUT_SECS", &mut config.callback_timeout);
        override_parsed(&lookup, "SIGNET_ATTEMPTS_PER_SECOND", &mut config.attempts_per_second);
        override_parsed(&lookup, "SIGNET_WORKER_CONCURRENCY", &mut config.worker_concurrency);
        override_millis(&lookup, "SIGNET_POLL_INTERVAL_MS", &mut config.poll_interval);
        override_secs(&lookup, "SIGNET_RETENTION_SECS", &mut config.retention);

        // Follows the escalated budget unless set explicitly.
        config.stale_claim_after = config.escalated_budget.saturating_add(STALE_CLAIM_GRACE);
        override_secs(&lookup, "SIGNET_STALE_CLAIM_AFTER_SECS", &mut config.stale_claim_after);

        config
    }

    /// Policy of a fast-path execution. `budget` overrides the default budget.
    pub fn fast_path_policy(&self, budget: Option<Duration>) -> RetryPolicy {
        self.backoff_policy()
            .with_maximum_elapsed(budget.unwrap_or(self.fast_path_budget))
    }

    /// Policy of an escalated execution: unbounded attempts, long outer bound.
    pub fn escalated_policy(&self) -> RetryPolicy {
        self.backoff_policy().with_maximum_elapsed(self.escalated_budget)
    }

    fn backoff_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: self.initial_interval,
            backoff_coefficient: self.backoff_coefficient,
            maximum_interval: self.maximum_interval,
            maximum_attempts: 0,
            maximum_elapsed: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.fast_path_budget.is_zero() || self.escalated_budget.is_zero() {
            return Err(DomainError::validation("time budgets must be > 0"));
        }
        if self.worker_concurrency == 0 {
            return Err(DomainError::validation("worker_concurrency must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(DomainError::validation("poll_interval must be > 0"));
        }
        if self.retention.is_zero() {
            return Err(DomainError::validation("retention must be > 0"));
        }
        AttemptThrottle::per_second(self.attempts_per_second)
            .map_err(|e| DomainError::validation(e.to_string()))?;
        self.escalated_policy().validate()
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable configuration value"),
    }
}

fn override_secs<F>(lookup: &F, key: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs();
    override_parsed(lookup, key, &mut secs);
    *target = Duration::from_secs(secs);
}

fn override_millis<F>(lookup: &F, key: &str, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let mut millis = u64::try_from(target.as_millis()).unwrap_or(u64::MAX);
    override_parsed(lookup, key, &mut millis);
    *target = Duration::from_millis(millis);
}
