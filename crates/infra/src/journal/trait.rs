use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use signet_core::{ExecutionId, ExpectedVersion, OrchestrationError};
use signet_events::{EventEnvelope, OrchestrationEvent};

/// A journalled event with its stream metadata.
pub type JournalRecord = EventEnvelope<OrchestrationEvent>;

/// Journal operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// orchestration outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    /// Another writer appended to the stream first.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JournalError> for OrchestrationError {
    fn from(value: JournalError) -> Self {
        OrchestrationError::Journal(value.to_string())
    }
}

/// Append-only store of execution streams.
///
/// ## Append Semantics
///
/// `append()`:
/// - checks optimistic concurrency against the current stream version
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists the batch atomically (all or nothing)
///
/// ## Load Semantics
///
/// `load()` returns the stream in sequence order, or an empty vector when the
/// execution has never been started.
///
/// ## Retention
///
/// `purge()` drops streams of finished executions (terminal status, no
/// callback left in flight) whose last event was recorded before the cutoff.
pub trait Journal: Send + Sync {
    fn append(
        &self,
        execution_id: ExecutionId,
        events: Vec<OrchestrationEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<JournalRecord>, JournalError>;

    fn load(&self, execution_id: ExecutionId) -> Result<Vec<JournalRecord>, JournalError>;

    /// Returns the number of streams dropped.
    fn purge(&self, finished_before: DateTime<Utc>) -> Result<usize, JournalError>;
}

impl<J> Journal for Arc<J>
where
    J: Journal + ?Sized,
{
    fn append(
        &self,
        execution_id: ExecutionId,
        events: Vec<OrchestrationEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<JournalRecord>, JournalError> {
        (**self).append(execution_id, events, expected_version)
    }

    fn load(&self, execution_id: ExecutionId) -> Result<Vec<JournalRecord>, JournalError> {
        (**self).load(execution_id)
    }

    fn purge(&self, finished_before: DateTime<Utc>) -> Result<usize, JournalError> {
        (**self).purge(finished_before)
    }
}
