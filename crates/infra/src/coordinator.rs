//! Escalation coordinator.
//!
//! Top-level state machine of one request:
//!
//! ```text
//! FastPath --success/fatal--> Completed
//! FastPath --out of time----> Escalated --(detached job)--> Succeeded | Failed | TimedOut
//! ```
//!
//! The fast path retries under a short budget. When it runs out of time it
//! enqueues an [`EscalationJob`] carrying [`Phase::Escalated`] and answers
//! `Pending` right away; a worker later runs the escalated execution under the
//! long budget and pushes a successful result to the callback URL, if any.
//! Which branch runs is decided by the phase flag alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use signet_core::{
    ExecutionId, OperationRequest, OrchestrationError, OrchestrationResult, Phase, RetryOutcome,
    RetryPolicy,
};
use signet_events::{CallbackState, ExecutionState, OrchestrationEvent};

use crate::callback::CallbackDispatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::OrchestratorConfig;
use crate::durable::DurableContext;
use crate::executor::RemoteOperation;
use crate::jobs::{EscalationJob, InMemoryJobStore, JobStore};
use crate::journal::{InMemoryJournal, Journal};
use crate::retry::RetryController;
use crate::throttle::AttemptThrottle;

/// What one retention sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Purged {
    pub streams: usize,
    pub jobs: usize,
}

pub struct EscalationCoordinator {
    config: OrchestratorConfig,
    operation: Arc<dyn RemoteOperation>,
    callbacks: Arc<dyn CallbackDispatcher>,
    journal: Arc<dyn Journal>,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    retry: RetryController,
}

impl EscalationCoordinator {
    /// Coordinator with in-memory journal and job store and the system clock.
    pub fn new(
        config: OrchestratorConfig,
        operation: Arc<dyn RemoteOperation>,
        callbacks: Arc<dyn CallbackDispatcher>,
    ) -> Result<Self, OrchestrationError> {
        let throttle = AttemptThrottle::per_second(config.attempts_per_second)
            .map_err(|e| OrchestrationError::Config(e.to_string()))?
            .map(Arc::new);
        Ok(Self {
            config,
            operation,
            callbacks,
            journal: Arc::new(InMemoryJournal::new()),
            jobs: InMemoryJobStore::arc(),
            clock: Arc::new(SystemClock),
            retry: RetryController::new(throttle),
        })
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run the fast path of `request`.
    ///
    /// Returns `Completed` on success, `Err(Fatal)` on a fatal failure, and
    /// `Pending` (with the escalated execution's id) once the escalation job
    /// is safely enqueued.
    pub async fn submit(
        &self,
        request: OperationRequest,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        request.validate()?;
        let policy = self.config.fast_path_policy(request.time_budget());
        let mut ctx = self.open(ExecutionId::new(), &request, Phase::FastPath, &policy, None)?;

        let outcome = self.retry_request(&mut ctx, &request, &policy).await?;
        match outcome {
            RetryOutcome::Success { payload, attempts } => {
                ctx.record(OrchestrationEvent::Succeeded {
                    payload: payload.clone(),
                })?;
                info!(execution_id = %ctx.execution_id(), attempts, "fast path completed");
                Ok(OrchestrationResult::Completed {
                    payload: request.operation().completed_body(payload),
                })
            }
            RetryOutcome::Fatal { error, attempts } => {
                ctx.record(OrchestrationEvent::Failed {
                    error: error.clone(),
                })?;
                warn!(
                    execution_id = %ctx.execution_id(),
                    attempts,
                    error = %error,
                    "fast path failed"
                );
                Err(OrchestrationError::Fatal(error))
            }
            RetryOutcome::TimeoutExceeded { attempts, .. } => {
                let child = self.escalate(&mut ctx, &request)?;
                info!(
                    execution_id = %ctx.execution_id(),
                    escalated_to = %child,
                    attempts,
                    "fast path out of time, escalated"
                );
                Ok(OrchestrationResult::Pending { execution_id: child })
            }
        }
    }

    /// Run (or resume) the escalated execution of `job`.
    ///
    /// Safe to call again for the same job: recorded attempts are replayed,
    /// and a callback whose intent is already journalled is never re-sent.
    pub async fn run_escalated(
        &self,
        job: &EscalationJob,
    ) -> Result<ExecutionState, OrchestrationError> {
        let mut ctx = self.open(
            job.id,
            &job.request,
            Phase::Escalated,
            &job.policy,
            Some(job.parent),
        )?;

        let outcome = self.retry_request(&mut ctx, &job.request, &job.policy).await?;
        match outcome {
            RetryOutcome::Success { payload, attempts } => {
                ctx.record(OrchestrationEvent::Succeeded {
                    payload: payload.clone(),
                })?;
                info!(execution_id = %job.id, attempts, "escalated execution succeeded");
                self.notify(&mut ctx, job.request.callback_url(), &payload).await?;
            }
            RetryOutcome::Fatal { error, attempts } => {
                ctx.record(OrchestrationEvent::Failed {
                    error: error.clone(),
                })?;
                warn!(
                    execution_id = %job.id,
                    attempts,
                    error = %error,
                    "escalated execution failed"
                );
            }
            RetryOutcome::TimeoutExceeded {
                attempts,
                last_error,
                ..
            } => {
                ctx.record(OrchestrationEvent::TimedOut {
                    attempts,
                    last_error: last_error.clone(),
                })?;
                warn!(
                    execution_id = %job.id,
                    attempts,
                    last_error = ?last_error,
                    "escalated execution ran out of time"
                );
            }
        }

        Ok(ctx.state().clone())
    }

    /// Run `request` synchronously under a bounded, fixed-interval `policy`.
    ///
    /// Never escalates: running out of attempts is reported as
    /// [`OrchestrationError::Exhausted`].
    pub async fn run_bounded(
        &self,
        request: OperationRequest,
        policy: RetryPolicy,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        request.validate()?;
        policy.validate()?;
        if policy.maximum_attempts == 0 {
            return Err(OrchestrationError::InvalidRequest(
                "a bounded execution needs maximum_attempts > 0".to_string(),
            ));
        }

        let mut ctx = self.open(ExecutionId::new(), &request, Phase::Bounded, &policy, None)?;
        match self.retry_request(&mut ctx, &request, &policy).await? {
            RetryOutcome::Success { payload, .. } => {
                ctx.record(OrchestrationEvent::Succeeded {
                    payload: payload.clone(),
                })?;
                Ok(OrchestrationResult::Completed {
                    payload: request.operation().completed_body(payload),
                })
            }
            RetryOutcome::Fatal { error, .. } => {
                ctx.record(OrchestrationEvent::Failed {
                    error: error.clone(),
                })?;
                Err(OrchestrationError::Fatal(error))
            }
            RetryOutcome::TimeoutExceeded {
                attempts,
                last_error,
                ..
            } => {
                ctx.record(OrchestrationEvent::TimedOut {
                    attempts,
                    last_error,
                })?;
                warn!(execution_id = %ctx.execution_id(), attempts, "bounded execution exhausted");
                Err(OrchestrationError::Exhausted { attempts })
            }
        }
    }

    /// State of an execution rebuilt from its journal; `None` if unknown.
    pub fn execution_state(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<ExecutionState>, OrchestrationError> {
        let records = self.journal.load(execution_id)?;
        ExecutionState::replay(&records).map_err(|e| OrchestrationError::Journal(e.to_string()))
    }

    /// Drop finished executions and jobs older than the configured retention.
    pub fn purge_expired(&self) -> Result<Purged, OrchestrationError> {
        let retention =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged = Purged {
            streams: self.journal.purge(cutoff)?,
            jobs: self.jobs.purge_finished(cutoff)?,
        };
        if purged != Purged::default() {
            debug!(
                streams = purged.streams,
                jobs = purged.jobs,
                "purged finished executions"
            );
        }
        Ok(purged)
    }

    fn open(
        &self,
        execution_id: ExecutionId,
        request: &OperationRequest,
        phase: Phase,
        policy: &RetryPolicy,
        parent: Option<ExecutionId>,
    ) -> Result<DurableContext, OrchestrationError> {
        let started = OrchestrationEvent::Started {
            request: request.clone(),
            phase,
            policy: policy.clone(),
            parent,
        };
        DurableContext::open(self.journal.clone(), self.clock.clone(), execution_id, started)
    }

    async fn retry_request(
        &self,
        ctx: &mut DurableContext,
        request: &OperationRequest,
        policy: &RetryPolicy,
    ) -> Result<RetryOutcome, OrchestrationError> {
        let operation = &self.operation;
        self.retry
            .run(ctx, policy, |_| operation.attempt(request))
            .await
    }

    /// Hand the request to a detached escalated execution.
    ///
    /// The child's stream is started, then the job enqueued, then the
    /// escalation recorded: a `Pending` answer always has an inspectable
    /// execution and a job behind it.
    fn escalate(
        &self,
        ctx: &mut DurableContext,
        request: &OperationRequest,
    ) -> Result<ExecutionId, OrchestrationError> {
        let child = ExecutionId::new();
        let parent = ctx.execution_id();
        let policy = self.config.escalated_policy();

        self.open(child, request, Phase::Escalated, &policy, Some(parent))?;
        let job = EscalationJob::new(child, parent, request.clone(), policy, self.clock.now());
        self.jobs.enqueue(job)?;
        ctx.record(OrchestrationEvent::Escalated { child })?;
        Ok(child)
    }

    /// Push a successful escalated result to the caller, at most once.
    async fn notify(
        &self,
        ctx: &mut DurableContext,
        callback_url: Option<&str>,
        payload: &[u8],
    ) -> Result<(), OrchestrationError> {
        let Some(url) = callback_url else {
            info!(
                execution_id = %ctx.execution_id(),
                "no callback configured, discarding escalated result"
            );
            return Ok(());
        };

        match ctx.state().callback().clone() {
            CallbackState::NotRequested => {
                ctx.record(OrchestrationEvent::CallbackIntended {
                    url: url.to_string(),
                })?;
                let delivery = self.callbacks.deliver(url, payload).await;
                if let Err(e) = &delivery {
                    warn!(
                        execution_id = %ctx.execution_id(),
                        error = %e,
                        "callback not delivered"
                    );
                }
                ctx.record(OrchestrationEvent::CallbackFinished {
                    delivered: delivery.is_ok(),
                    error: delivery.err().map(|e| e.to_string()),
                })?;
            }
            CallbackState::Intended { .. } => {
                // Interrupted after the intent was recorded; the outcome of
                // that send is unknown and it must not be repeated.
                ctx.record(OrchestrationEvent::CallbackIntended {
                    url: url.to_string(),
                })?;
                warn!(
                    execution_id = %ctx.execution_id(),
                    "callback interrupted before its outcome was recorded, not re-sending"
                );
                ctx.record(OrchestrationEvent::CallbackFinished {
                    delivered: false,
                    error: Some("interrupted before the outcome was recorded".to_string()),
                })?;
            }
            CallbackState::Delivered { .. } | CallbackState::Failed { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use signet_core::{AttemptError, AttemptOutcome, Operation, VERIFIED_BODY};
    use signet_events::ExecutionStatus;

    use crate::callback::CallbackError;
    use crate::clock::ManualClock;
    use crate::jobs::{EscalationWorker, JobStatus};

    /// Scripted remote: hands out outcomes in order, then repeats the last.
    struct ScriptedRemote {
        outcomes: Mutex<VecDeque<AttemptOutcome>>,
        calls: AtomicU32,
    }

    impl ScriptedRemote {
        fn new(outcomes: Vec<AttemptOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn failing_then_success(failures: usize) -> Arc<Self> {
            let mut outcomes = vec![busy(); failures];
            outcomes.push(AttemptOutcome::Success(b"sig".to_vec()));
            Self::new(outcomes)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteOperation for ScriptedRemote {
        async fn attempt(&self, _request: &OperationRequest) -> AttemptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap()
            }
        }
    }

    #[derive(Default)]
    struct RecordingCallbacks {
        delivered: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingCallbacks {
        fn delivered(&self) -> Vec<(String, Vec<u8>)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallbackDispatcher for RecordingCallbacks {
        async fn deliver(&self, url: &str, payload: &[u8]) -> Result<(), CallbackError> {
            self.delivered
                .lock()
                .unwrap()
                .push((url.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn busy() -> AttemptOutcome {
        AttemptOutcome::RetryableFailure(AttemptError::rejection(503, "busy"))
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            attempts_per_second: 0.0,
            poll_interval: Duration::from_millis(5),
            ..OrchestratorConfig::default()
        }
    }

    fn sign(callback: Option<&str>) -> OperationRequest {
        let request = OperationRequest::new(
            Operation::Sign {
                message: "hello world".into(),
            },
            "key",
            "http://remote/sign",
        );
        match callback {
            Some(url) => request.with_callback(url),
            None => request,
        }
    }

    struct Harness {
        coordinator: Arc<EscalationCoordinator>,
        remote: Arc<ScriptedRemote>,
        callbacks: Arc<RecordingCallbacks>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: OrchestratorConfig, remote: Arc<ScriptedRemote>) -> Harness {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let clock = Arc::new(ManualClock::default());
        let coordinator = EscalationCoordinator::new(config, remote.clone(), callbacks.clone())
            .unwrap()
            .with_clock(clock.clone());
        Harness {
            coordinator: Arc::new(coordinator),
            remote,
            callbacks,
            clock,
        }
    }

    fn pending_job(h: &Harness, result: OrchestrationResult) -> EscalationJob {
        let OrchestrationResult::Pending { execution_id } = result else {
            panic!("expected pending, got {result:?}");
        };
        h.coordinator.jobs().get(execution_id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn fast_success_completes_without_escalation() {
        let h = harness(config(), ScriptedRemote::failing_then_success(0));

        let result = h
            .coordinator
            .submit(sign(Some("http://caller/hook")))
            .await
            .unwrap();

        assert_eq!(
            result,
            OrchestrationResult::Completed {
                payload: b"sig".to_vec()
            }
        );
        assert_eq!(h.remote.calls(), 1);
        assert!(h.callbacks.delivered().is_empty());
        assert_eq!(h.coordinator.jobs().stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn successful_verify_answers_with_fixed_body() {
        let h = harness(config(), ScriptedRemote::failing_then_success(0));
        let request = OperationRequest::new(
            Operation::Verify {
                message: "hello".into(),
                signature: "c2ln".into(),
            },
            "key",
            "http://remote/verify",
        );

        let result = h.coordinator.submit(request).await.unwrap();
        assert_eq!(
            result,
            OrchestrationResult::Completed {
                payload: VERIFIED_BODY.as_bytes().to_vec()
            }
        );
    }

    #[tokio::test]
    async fn fatal_failure_is_surfaced_synchronously() {
        let h = harness(
            config(),
            ScriptedRemote::new(vec![AttemptOutcome::FatalFailure(AttemptError::transport(
                "connection refused",
            ))]),
        );

        let err = h.coordinator.submit(sign(None)).await.unwrap_err();

        assert!(matches!(err, OrchestrationError::Fatal(AttemptError::Transport { .. })));
        assert_eq!(h.remote.calls(), 1);
        assert_eq!(h.coordinator.jobs().stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn escalated_success_sends_exactly_one_callback() {
        let h = harness(config(), ScriptedRemote::failing_then_success(6));

        let result = h
            .coordinator
            .submit(sign(Some("http://caller/hook")))
            .await
            .unwrap();
        assert!(result.is_pending());
        // 1s then 1.5s would overrun the 2s fast-path budget.
        assert_eq!(h.remote.calls(), 2);
        assert!(h.callbacks.delivered().is_empty());

        let job = pending_job(&h, result);
        let state = h.coordinator.run_escalated(&job).await.unwrap();

        assert_eq!(state.status(), &ExecutionStatus::Succeeded);
        assert_eq!(state.phase(), Phase::Escalated);
        assert_eq!(h.remote.calls(), 7);
        assert_eq!(
            h.callbacks.delivered(),
            vec![("http://caller/hook".to_string(), b"sig".to_vec())]
        );

        let parent = h.coordinator.execution_state(job.parent).unwrap().unwrap();
        assert_eq!(
            parent.status(),
            &ExecutionStatus::Escalated { child: job.id }
        );
    }

    #[tokio::test]
    async fn escalated_without_callback_discards_result() {
        let h = harness(config(), ScriptedRemote::failing_then_success(3));

        let result = h.coordinator.submit(sign(None)).await.unwrap();
        let job = pending_job(&h, result);
        let state = h.coordinator.run_escalated(&job).await.unwrap();

        assert_eq!(state.status(), &ExecutionStatus::Succeeded);
        assert_eq!(state.callback(), &CallbackState::NotRequested);
        assert!(h.callbacks.delivered().is_empty());
    }

    #[tokio::test]
    async fn explicit_budget_equal_to_default_still_escalates_once() {
        let config = config();
        let budget = config.fast_path_budget;
        let h = harness(config, ScriptedRemote::new(vec![busy()]));

        let result = h
            .coordinator
            .submit(sign(Some("http://caller/hook")).with_time_budget(budget))
            .await
            .unwrap();
        let job = pending_job(&h, result);
        assert_eq!(job.policy, h.coordinator.config().escalated_policy());

        let state = h.coordinator.run_escalated(&job).await.unwrap();

        assert!(matches!(state.status(), ExecutionStatus::TimedOut { .. }));
        assert!(h.callbacks.delivered().is_empty());
        // The escalated execution never escalates again.
        let all = h.coordinator.jobs().list_by_status(None, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert!(h.clock.sleeps().iter().all(|d| *d <= Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn rerunning_an_escalated_job_does_not_resend_callback() {
        let h = harness(config(), ScriptedRemote::failing_then_success(4));

        let result = h
            .coordinator
            .submit(sign(Some("http://caller/hook")))
            .await
            .unwrap();
        let job = pending_job(&h, result);

        let first = h.coordinator.run_escalated(&job).await.unwrap();
        let calls = h.remote.calls();
        let second = h.coordinator.run_escalated(&job).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.remote.calls(), calls);
        assert_eq!(h.callbacks.delivered().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_callback_is_not_resent() {
        let h = harness(config(), ScriptedRemote::failing_then_success(0));
        let request = sign(Some("http://caller/hook"));
        let job = EscalationJob::new(
            ExecutionId::new(),
            ExecutionId::new(),
            request.clone(),
            h.coordinator.config().escalated_policy(),
            h.clock.now(),
        );

        // Journal of a run that crashed right after recording the intent.
        let mut ctx = h
            .coordinator
            .open(job.id, &request, Phase::Escalated, &job.policy, Some(job.parent))
            .unwrap();
        ctx.now().unwrap();
        ctx.attempt(1, || async { AttemptOutcome::Success(b"sig".to_vec()) })
            .await
            .unwrap();
        ctx.record(OrchestrationEvent::Succeeded {
            payload: b"sig".to_vec(),
        })
        .unwrap();
        ctx.record(OrchestrationEvent::CallbackIntended {
            url: "http://caller/hook".to_string(),
        })
        .unwrap();
        drop(ctx);

        let state = h.coordinator.run_escalated(&job).await.unwrap();

        assert!(h.callbacks.delivered().is_empty());
        assert_eq!(h.remote.calls(), 0);
        assert!(matches!(state.callback(), CallbackState::Failed { .. }));
    }

    #[tokio::test]
    async fn bounded_variant_reports_exhaustion() {
        let h = harness(config(), ScriptedRemote::new(vec![busy()]));
        let policy = RetryPolicy::fixed(Duration::from_millis(100), 30);

        let err = h
            .coordinator
            .run_bounded(sign(Some("http://caller/hook")), policy)
            .await
            .unwrap_err();

        assert_eq!(err, OrchestrationError::Exhausted { attempts: 30 });
        assert_eq!(h.remote.calls(), 30);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(100); 29]);
        assert_eq!(h.coordinator.jobs().stats().unwrap().pending, 0);
        assert!(h.callbacks.delivered().is_empty());
    }

    #[tokio::test]
    async fn bounded_variant_stops_on_first_success() {
        let h = harness(config(), ScriptedRemote::failing_then_success(2));

        let result = h
            .coordinator
            .run_bounded(sign(None), RetryPolicy::fixed(Duration::from_millis(100), 30))
            .await
            .unwrap();

        assert_eq!(
            result,
            OrchestrationResult::Completed {
                payload: b"sig".to_vec()
            }
        );
        assert_eq!(h.remote.calls(), 3);
    }

    #[tokio::test]
    async fn bounded_variant_requires_an_attempt_bound() {
        let h = harness(config(), ScriptedRemote::new(vec![busy()]));
        let policy = RetryPolicy::default().with_maximum_elapsed(Duration::from_secs(5));

        let err = h.coordinator.run_bounded(sign(None), policy).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidRequest(_)));
        assert_eq!(h.remote.calls(), 0);
    }

    #[tokio::test]
    async fn worker_runs_escalated_job_to_completion() {
        let h = harness(config(), ScriptedRemote::failing_then_success(5));

        let result = h
            .coordinator
            .submit(sign(Some("http://caller/hook")))
            .await
            .unwrap();
        let OrchestrationResult::Pending { execution_id } = result else {
            panic!("expected pending");
        };

        let handle = EscalationWorker::new(h.coordinator.clone()).spawn();
        let job = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = h.coordinator.jobs().get(execution_id).unwrap().unwrap();
                if job.status.is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let stats = handle.shutdown().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(stats.jobs_succeeded, 1);

        assert_eq!(h.callbacks.delivered().len(), 1);
    }

    struct SlowRemote {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteOperation for SlowRemote {
        async fn attempt(&self, _request: &OperationRequest) -> AttemptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            AttemptOutcome::Success(b"late".to_vec())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_past_the_budget_escalates() {
        let remote = Arc::new(SlowRemote {
            delay: Duration::from_secs(30),
            calls: AtomicU32::new(0),
        });
        let coordinator = EscalationCoordinator::new(
            config(),
            remote.clone(),
            Arc::new(RecordingCallbacks::default()),
        )
        .unwrap();

        let begin = tokio::time::Instant::now();
        let result = coordinator.submit(sign(None)).await.unwrap();
        let waited = begin.elapsed();

        assert!(result.is_pending(), "{result:?}");
        assert!(waited < Duration::from_millis(2100), "waited {waited:?}");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.jobs().stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn throttled_callers_escalate_instead_of_queueing_past_the_budget() {
        let config = OrchestratorConfig {
            fast_path_budget: Duration::from_millis(300),
            attempts_per_second: 2.0,
            ..config()
        };
        let coordinator = Arc::new(
            EscalationCoordinator::new(
                config,
                ScriptedRemote::failing_then_success(0),
                Arc::new(RecordingCallbacks::default()),
            )
            .unwrap(),
        );

        let begin = std::time::Instant::now();
        let callers: Vec<_> = (0..6)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.submit(sign(None)).await })
            })
            .collect();

        let mut pending = 0;
        for caller in callers {
            if caller.await.unwrap().unwrap().is_pending() {
                pending += 1;
            }
        }

        // One slot per 500ms: only the first caller gets through in time.
        assert!(begin.elapsed() < Duration::from_secs(1), "{:?}", begin.elapsed());
        assert_eq!(pending, 5);
        assert_eq!(coordinator.jobs().stats().unwrap().pending, 5);
    }

    #[test]
    fn unrepresentable_throttle_rate_is_a_configuration_error() {
        let config = OrchestratorConfig {
            attempts_per_second: 1e-320,
            ..config()
        };
        let err = EscalationCoordinator::new(
            config,
            ScriptedRemote::failing_then_success(0),
            Arc::new(RecordingCallbacks::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, OrchestrationError::Config(_)));
    }

    #[tokio::test]
    async fn escalated_execution_is_visible_before_it_is_claimed() {
        let h = harness(config(), ScriptedRemote::new(vec![busy()]));

        let result = h.coordinator.submit(sign(None)).await.unwrap();
        let job = pending_job(&h, result);
        assert_eq!(job.status, JobStatus::Pending);

        let state = h.coordinator.execution_state(job.id).unwrap().unwrap();
        assert_eq!(state.phase(), Phase::Escalated);
        assert_eq!(state.status(), &ExecutionStatus::Running);
        assert_eq!(state.parent(), Some(job.parent));
        assert_eq!(state.attempts(), 0);
    }

    #[tokio::test]
    async fn finished_executions_are_purged_after_retention() {
        let clock = Arc::new(ManualClock::default());
        let coordinator = EscalationCoordinator::new(
            config(),
            ScriptedRemote::failing_then_success(3),
            Arc::new(RecordingCallbacks::default()),
        )
        .unwrap()
        .with_clock(clock.clone())
        .with_journal(Arc::new(InMemoryJournal::with_clock(clock.clone())));
        let retention = coordinator.config().retention;

        let OrchestrationResult::Pending { execution_id } =
            coordinator.submit(sign(None)).await.unwrap()
        else {
            panic!("expected pending");
        };
        let mut job = coordinator.jobs().get(execution_id).unwrap().unwrap();

        // The escalated fast path is finished; its unclaimed child is not.
        clock.advance(retention + Duration::from_secs(1));
        assert_eq!(
            coordinator.purge_expired().unwrap(),
            Purged {
                streams: 1,
                jobs: 0
            }
        );
        assert!(coordinator.execution_state(job.parent).unwrap().is_none());
        assert!(coordinator.execution_state(job.id).unwrap().is_some());

        coordinator.run_escalated(&job).await.unwrap();
        job.mark_completed(clock.now());
        coordinator.jobs().update(&job).unwrap();
        assert_eq!(coordinator.purge_expired().unwrap(), Purged::default());

        clock.advance(retention + Duration::from_secs(1));
        assert_eq!(
            coordinator.purge_expired().unwrap(),
            Purged {
                streams: 1,
                jobs: 1
            }
        );
        assert!(coordinator.execution_state(job.id).unwrap().is_none());
        assert!(coordinator.jobs().get(job.id).unwrap().is_none());
    }
}
