//! Queued escalation jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use signet_core::{ExecutionId, OperationRequest, RetryPolicy};

/// Job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Claimed by a worker
    Running,
    /// The escalated execution reached a terminal state
    Completed,
    /// The escalated execution could not be driven to a terminal state
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// One escalated execution waiting to run (or running).
///
/// The job id is the escalated execution's id, so a reclaimed job resumes the
/// same journal stream instead of starting over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationJob {
    pub id: ExecutionId,
    pub parent: ExecutionId,
    pub request: OperationRequest,
    pub policy: RetryPolicy,
    pub status: JobStatus,
    /// How many times a worker has claimed the job.
    pub claims: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl EscalationJob {
    pub fn new(
        id: ExecutionId,
        parent: ExecutionId,
        request: OperationRequest,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parent,
            request,
            policy,
            status: JobStatus::Pending,
            claims: 0,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        }
    }

    /// Eligible for a worker: pending, or running with a claim older than
    /// `stale_after` (its worker is presumed dead).
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Running => self
                .claimed_at
                .is_some_and(|claimed| now.signed_duration_since(claimed) >= stale_after),
            _ => false,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.claims += 1;
        self.claimed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed { error };
        self.updated_at = now;
    }
}
