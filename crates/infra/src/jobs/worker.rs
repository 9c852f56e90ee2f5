//! Escalation worker pool.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use signet_core::OrchestrationError;

use super::store::JobStore;
use super::types::EscalationJob;
use crate::config::OrchestratorConfig;
use crate::coordinator::EscalationCoordinator;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum concurrent escalated executions
    pub max_concurrent: usize,
    /// How often to poll for new jobs when idle
    pub poll_interval: Duration,
    /// Age after which a running job's claim is considered abandoned
    pub stale_after: Duration,
    /// How often finished executions past their retention are purged
    pub sweep_interval: Duration,
}

impl From<&OrchestratorConfig> for WorkerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            name: "escalation-worker".to_string(),
            max_concurrent: config.worker_concurrency.max(1),
            poll_interval: config.poll_interval,
            stale_after: config.stale_claim_after,
            sweep_interval: config.retention.min(Duration::from_secs(60)),
        }
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
}

/// Handle to a running worker.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) also stops
/// the worker, without waiting for in-flight jobs.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop claiming jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) -> WorkerStats {
        let Self {
            shutdown,
            join,
            stats,
        } = self;
        let _ = shutdown.send(true);
        if let Err(e) = join.await {
            error!(error = %e, "escalation worker task ended abnormally");
        }
        lock(&stats).clone()
    }

    pub fn stats(&self) -> WorkerStats {
        lock(&self.stats).clone()
    }
}

/// Runs escalated executions claimed from the coordinator's job store.
///
/// Jobs run on their own tasks, independent of the request that escalated
/// them; at most `max_concurrent` run at once.
pub struct EscalationWorker {
    coordinator: Arc<EscalationCoordinator>,
    config: WorkerConfig,
}

impl EscalationWorker {
    pub fn new(coordinator: Arc<EscalationCoordinator>) -> Self {
        let config = WorkerConfig::from(coordinator.config());
        Self {
            coordinator,
            config,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the polling loop on the tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(worker_loop(self, shutdown_rx, stats.clone()));

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// Claim and run a single job inline. `Ok(false)` when none is claimable.
    pub async fn run_once(&self) -> Result<bool, OrchestrationError> {
        match self.claim()? {
            Some(job) => {
                let stats = Mutex::new(WorkerStats::default());
                process(&self.coordinator, job, &stats).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn claim(&self) -> Result<Option<EscalationJob>, OrchestrationError> {
        let stale_after =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::MAX);
        let now = self.coordinator.clock().now();
        Ok(self.coordinator.jobs().claim_next(now, stale_after)?)
    }
}

async fn worker_loop(
    worker: EscalationWorker,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let name = worker.config.name.clone();
    let max_concurrent = worker.config.max_concurrent;
    info!(worker = %name, max_concurrent, "escalation worker started");
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut next_sweep = Instant::now() + worker.config.sweep_interval;

    loop {
        if *shutdown.borrow() {
            break;
        }

        if Instant::now() >= next_sweep {
            if let Err(e) = worker.coordinator.purge_expired() {
                error!(worker = %name, error = %e, "retention sweep failed");
            }
            next_sweep = Instant::now() + worker.config.sweep_interval;
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match worker.claim() {
            Ok(Some(job)) => {
                debug!(worker = %name, job_id = %job.id, claims = job.claims, "claimed job");
                lock(&stats).current_running += 1;

                let coordinator = worker.coordinator.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    process(&coordinator, job, &stats).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                idle(&mut shutdown, worker.config.poll_interval).await;
            }
            Err(e) => {
                error!(worker = %name, error = %e, "failed to claim job");
                drop(permit);
                idle(&mut shutdown, worker.config.poll_interval).await;
            }
        }
    }

    // Wait for in-flight jobs.
    let in_flight = u32::try_from(max_concurrent).unwrap_or(u32::MAX);
    let _ = permits.acquire_many(in_flight).await;
    info!(worker = %name, "escalation worker stopped");
}

async fn idle(shutdown: &mut watch::Receiver<bool>, poll_interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => {}
        _ = shutdown.changed() => {}
    }
}

async fn process(
    coordinator: &EscalationCoordinator,
    mut job: EscalationJob,
    stats: &Mutex<WorkerStats>,
) {
    let result = coordinator.run_escalated(&job).await;
    let now = coordinator.clock().now();

    match &result {
        Ok(state) => {
            debug!(job_id = %job.id, status = ?state.status(), "escalated execution finished");
            job.mark_completed(now);
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "escalated execution aborted");
            job.mark_failed(e.to_string(), now);
        }
    }

    if let Err(e) = coordinator.jobs().update(&job) {
        error!(job_id = %job.id, error = %e, "failed to record job status");
    }

    let mut s = lock(stats);
    s.current_running = s.current_running.saturating_sub(1);
    s.jobs_processed += 1;
    match result {
        Ok(_) => s.jobs_succeeded += 1,
        Err(_) => s.jobs_failed += 1,
    }
}

fn lock(stats: &Mutex<WorkerStats>) -> std::sync::MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}
