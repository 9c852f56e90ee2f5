//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use signet_core::{ExecutionId, OrchestrationError};

use super::types::{EscalationJob, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: EscalationJob) -> Result<ExecutionId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: ExecutionId) -> Result<Option<EscalationJob>, JobStoreError>;

    /// Update a job.
    fn update(&self, job: &EscalationJob) -> Result<(), JobStoreError>;

    /// Claim the oldest claimable job, marking it running.
    /// Returns None if no jobs are available.
    fn claim_next(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<Option<EscalationJob>, JobStoreError>;

    /// List jobs by status (all jobs when `status` is None), oldest first.
    fn list_by_status(
        &self,
        status: Option<&JobStatus>,
        limit: usize,
    ) -> Result<Vec<EscalationJob>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Remove completed or failed jobs last updated before `finished_before`.
    /// Returns the number removed.
    fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, JobStoreError>;
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, job: EscalationJob) -> Result<ExecutionId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: ExecutionId) -> Result<Option<EscalationJob>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &EscalationJob) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<Option<EscalationJob>, JobStoreError> {
        (**self).claim_next(now, stale_after)
    }

    fn list_by_status(
        &self,
        status: Option<&JobStatus>,
        limit: usize,
    ) -> Result<Vec<EscalationJob>, JobStoreError> {
        (**self).list_by_status(status, limit)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }

    fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        (**self).purge_finished(finished_before)
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(ExecutionId),
    #[error("job already exists: {0}")]
    AlreadyExists(ExecutionId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JobStoreError> for OrchestrationError {
    fn from(value: JobStoreError) -> Self {
        OrchestrationError::Queue(value.to_string())
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<ExecutionId, EscalationJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: EscalationJob) -> Result<ExecutionId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: ExecutionId) -> Result<Option<EscalationJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &EscalationJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn claim_next(
        &self,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<Option<EscalationJob>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;

        // Oldest first; ids are v7 so they break ties in creation order.
        let next = jobs
            .values()
            .filter(|j| j.is_claimable(now, stale_after))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(now);
                job.clone()
            })
        }))
    }

    fn list_by_status(
        &self,
        status: Option<&JobStatus>,
        limit: usize,
    ) -> Result<Vec<EscalationJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| {
                status.is_none_or(|s| {
                    std::mem::discriminant(&j.status) == std::mem::discriminant(s)
                })
            })
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn purge_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let held = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < finished_before));
        Ok(held - jobs.len())
    }
}
