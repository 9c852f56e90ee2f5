//! Retry controller.
//!
//! Drives attempts of one operation under a [`RetryPolicy`] until one of:
//! success, a fatal failure, or exhaustion of the attempt/time bounds. Delays
//! grow as `min(initial * coefficient^i, maximum)`. Every input (clock reads,
//! outcomes, timers) flows through the [`DurableContext`], so a resumed run
//! reaches the same decisions without repeating completed attempts.
//!
//! An attempt in flight when the time budget runs out, still waiting on the
//! throttle or on the remote, is dropped and journalled as
//! [`AttemptError::OutOfTime`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use signet_core::{AttemptError, AttemptOutcome, OrchestrationError, RetryOutcome, RetryPolicy};

use crate::clock::Clock;
use crate::durable::DurableContext;
use crate::throttle::AttemptThrottle;

#[derive(Debug, Clone, Default)]
pub struct RetryController {
    throttle: Option<Arc<AttemptThrottle>>,
}

impl RetryController {
    pub fn new(throttle: Option<Arc<AttemptThrottle>>) -> Self {
        Self { throttle }
    }

    pub fn unthrottled() -> Self {
        Self::default()
    }

    /// Run `attempt_fn` (called with the 1-based attempt number) under `policy`.
    ///
    /// `maximum_elapsed` is treated as a hard budget: a retry is not scheduled
    /// when its delay would end past the budget, and an attempt still running
    /// when the budget ends is cut off.
    pub async fn run<F, Fut>(
        &self,
        ctx: &mut DurableContext,
        policy: &RetryPolicy,
        mut attempt_fn: F,
    ) -> Result<RetryOutcome, OrchestrationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let started = ctx.now()?;
        let clock = ctx.clock();
        let mut last_error: Option<AttemptError> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            // Read live and never journalled: it only bounds the wait below.
            let remaining = policy
                .maximum_elapsed
                .map(|budget| budget.saturating_sub(since(started, clock.now())));
            let throttle = self.throttle.clone();
            let cutoff = clock.clone();

            let outcome = ctx
                .attempt(attempt, || {
                    let pending = attempt_fn(attempt);
                    async move {
                        let issue = async move {
                            if let Some(throttle) = throttle {
                                throttle.acquire().await;
                            }
                            pending.await
                        };
                        match remaining {
                            None => issue.await,
                            Some(remaining) => tokio::select! {
                                biased;
                                outcome = issue => outcome,
                                _ = cutoff.deadline(remaining) => {
                                    AttemptOutcome::RetryableFailure(AttemptError::OutOfTime)
                                }
                            },
                        }
                    }
                })
                .await?;

            let error = match outcome {
                AttemptOutcome::Success(payload) => {
                    return Ok(RetryOutcome::Success {
                        payload,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::FatalFailure(error) => {
                    return Ok(RetryOutcome::Fatal {
                        error,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::RetryableFailure(AttemptError::OutOfTime) => {
                    let elapsed = since(started, ctx.now()?);
                    debug!(
                        execution_id = %ctx.execution_id(),
                        attempt,
                        "time budget ran out during the attempt"
                    );
                    return Ok(RetryOutcome::TimeoutExceeded {
                        attempts: attempt,
                        elapsed,
                        last_error: last_error.or(Some(AttemptError::OutOfTime)),
                    });
                }
                AttemptOutcome::RetryableFailure(error) => error,
            };
            debug!(
                execution_id = %ctx.execution_id(),
                attempt,
                error = %error,
                "attempt failed, considering retry"
            );
            last_error = Some(error);

            let elapsed = since(started, ctx.now()?);
            let delay = policy.interval_for(attempt - 1);
            let out_of_time = policy.elapsed_exhausted(elapsed)
                || policy
                    .maximum_elapsed
                    .is_some_and(|budget| elapsed.saturating_add(delay) > budget);

            if policy.attempts_exhausted(attempt) || out_of_time {
                return Ok(RetryOutcome::TimeoutExceeded {
                    attempts: attempt,
                    elapsed,
                    last_error,
                });
            }

            ctx.sleep(attempt, delay).await?;
        }
    }
}

fn since(started: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use proptest::prelude::*;
    use signet_core::{ExecutionId, Operation, OperationRequest, Phase};
    use signet_events::OrchestrationEvent;

    use crate::clock::ManualClock;
    use crate::executor::{RemoteOperation, SimulatedOperation};
    use crate::journal::{InMemoryJournal, Journal};

    fn request() -> OperationRequest {
        OperationRequest::new(
            Operation::Sign {
                message: "hello world".into(),
            },
            "key",
            "http://remote/sign",
        )
    }

    fn context(policy: &RetryPolicy, clock: Arc<ManualClock>) -> DurableContext {
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::with_clock(clock.clone()));
        let started = OrchestrationEvent::Started {
            request: request(),
            phase: Phase::Escalated,
            policy: policy.clone(),
            parent: None,
        };
        DurableContext::open(journal, clock, ExecutionId::new(), started).unwrap()
    }

    fn busy() -> AttemptOutcome {
        AttemptOutcome::RetryableFailure(AttemptError::rejection(503, "busy"))
    }

    /// Hands out scripted outcomes, then keeps repeating the last one.
    struct Script {
        outcomes: Mutex<VecDeque<AttemptOutcome>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(outcomes: Vec<AttemptOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn next(&self) -> AttemptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap()
            }
        }
    }

    #[tokio::test]
    async fn exponential_backoff_until_success() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(3600));
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());
        let mut outcomes = vec![busy(); 5];
        outcomes.push(AttemptOutcome::Success(b"sig".to_vec()));
        let script = Script::new(outcomes);

        let outcome = RetryController::unthrottled()
            .run(&mut ctx, &policy, |_| async { script.next() })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                payload: b"sig".to_vec(),
                attempts: 6
            }
        );
        assert_eq!(script.calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs_f64(1.0),
                Duration::from_secs_f64(1.5),
                Duration::from_secs_f64(2.25),
                Duration::from_secs_f64(3.375),
                Duration::from_secs_f64(5.0625),
            ]
        );
    }

    #[tokio::test]
    async fn fatal_failure_stops_immediately() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(3600));
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());
        let script = Script::new(vec![AttemptOutcome::FatalFailure(AttemptError::transport(
            "connection refused",
        ))]);

        let outcome = RetryController::unthrottled()
            .run(&mut ctx, &policy, |_| async { script.next() })
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Fatal { attempts: 1, .. }));
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn short_budget_times_out_without_sleeping_past_it() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(2));
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());
        let script = Script::new(vec![busy()]);

        let outcome = RetryController::unthrottled()
            .run(&mut ctx, &policy, |_| async { script.next() })
            .await
            .unwrap();

        // 1s then 1.5s would end at 2.5s, past the 2s budget.
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
        match outcome {
            RetryOutcome::TimeoutExceeded {
                attempts,
                elapsed,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(elapsed, Duration::from_secs(1));
                assert_eq!(last_error, Some(AttemptError::rejection(503, "busy")));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fixed_interval_with_seeded_flaky_remote() {
        let policy = RetryPolicy::fixed(Duration::from_millis(100), 30);

        let mut results = Vec::new();
        for _ in 0..2 {
            let clock = Arc::new(ManualClock::default());
            let mut ctx = context(&policy, clock.clone());
            let remote = SimulatedOperation::seeded(42, 1.0 / 3.0);
            let request = request();
            let outcome = RetryController::unthrottled()
                .run(&mut ctx, &policy, |_| remote.attempt(&request))
                .await
                .unwrap();

            assert!(outcome.attempts() <= 30);
            assert!(
                clock
                    .sleeps()
                    .iter()
                    .all(|d| *d == Duration::from_millis(100))
            );
            assert_eq!(clock.sleeps().len() as u32, outcome.attempts() - 1);
            results.push(outcome);
        }
        assert_eq!(results[0], results[1]);
    }

    #[tokio::test]
    async fn throttle_paces_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 3);
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());
        let throttle = AttemptThrottle::per_second(10.0).unwrap().map(Arc::new);
        let script = Script::new(vec![busy()]);

        let begin = std::time::Instant::now();
        let outcome = RetryController::new(throttle)
            .run(&mut ctx, &policy, |_| async { script.next() })
            .await
            .unwrap();

        assert_eq!(outcome.attempts(), 3);
        assert!(begin.elapsed() >= Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_cut_off_at_the_budget() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(2));
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());

        let begin = tokio::time::Instant::now();
        let outcome = RetryController::unthrottled()
            .run(&mut ctx, &policy, |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                AttemptOutcome::Success(b"late".to_vec())
            })
            .await
            .unwrap();

        let waited = begin.elapsed();
        assert!(waited >= Duration::from_secs(2), "{waited:?}");
        assert!(waited < Duration::from_secs(3), "{waited:?}");
        assert_eq!(
            outcome,
            RetryOutcome::TimeoutExceeded {
                attempts: 1,
                elapsed: Duration::from_secs(2),
                last_error: Some(AttemptError::OutOfTime),
            }
        );
        assert!(clock.sleeps().is_empty());
        assert_eq!(ctx.state().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cut_off_attempt_replays_to_the_same_decision() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(2));
        let clock = Arc::new(ManualClock::default());
        let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::with_clock(clock.clone()));
        let id = ExecutionId::new();
        let started = OrchestrationEvent::Started {
            request: request(),
            phase: Phase::Escalated,
            policy: policy.clone(),
            parent: None,
        };
        let calls = AtomicU32::new(0);
        let slow = |_: u32| async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            AttemptOutcome::Success(b"late".to_vec())
        };

        let mut ctx =
            DurableContext::open(journal.clone(), clock.clone(), id, started.clone()).unwrap();
        let first = RetryController::unthrottled()
            .run(&mut ctx, &policy, slow)
            .await
            .unwrap();
        drop(ctx);

        let mut resumed = DurableContext::open(journal, clock, id, started).unwrap();
        let second = RetryController::unthrottled()
            .run(&mut resumed, &policy, slow)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiting_on_the_throttle_counts_against_the_budget() {
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_millis(100));
        let clock = Arc::new(ManualClock::default());
        let mut ctx = context(&policy, clock.clone());
        let throttle = AttemptThrottle::per_second(1.0).unwrap().map(Arc::new);
        // Another request took the only slot of the next second.
        if let Some(throttle) = &throttle {
            throttle.acquire().await;
        }
        let script = Script::new(vec![AttemptOutcome::Success(b"sig".to_vec())]);

        let begin = std::time::Instant::now();
        let outcome = RetryController::new(throttle)
            .run(&mut ctx, &policy, |_| async { script.next() })
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::TimeoutExceeded { attempts: 1, .. }));
        assert_eq!(script.calls.load(Ordering::SeqCst), 0);
        assert!(begin.elapsed() < Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn bounded_policy_never_exceeds_its_attempts(max in 1u32..20, millis in 1u64..500) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let policy = RetryPolicy::fixed(Duration::from_millis(millis), max);
            let clock = Arc::new(ManualClock::default());
            let script = Script::new(vec![busy()]);

            let outcome = rt.block_on(async {
                let mut ctx = context(&policy, clock.clone());
                RetryController::unthrottled()
                    .run(&mut ctx, &policy, |_| async { script.next() })
                    .await
                    .unwrap()
            });

            prop_assert_eq!(outcome.attempts(), max);
            prop_assert_eq!(script.calls.load(Ordering::SeqCst), max);
            prop_assert_eq!(clock.sleeps().len() as u32, max - 1);
        }
    }
}
