//! Error taxonomy.
//!
//! - [`DomainError`]: deterministic validation failures.
//! - [`AttemptError`]: why a single remote attempt did not succeed.
//! - [`OrchestrationError`]: what the caller of an orchestration may observe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (stale stream version).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

/// Failure of one attempt against the remote service.
///
/// Persisted in the execution journal, hence serde.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// The remote could not be reached (dial/connect/request construction).
    #[error("could not reach remote service: {message}")]
    Transport { message: String },

    /// The remote did not answer within the per-attempt client timeout.
    #[error("remote service did not answer in time: {message}")]
    Timeout { message: String },

    /// The remote answered with a non-success status.
    #[error("remote service rejected the request with status {status}: {body}")]
    RemoteRejection { status: u16, body: String },

    /// The remote answer could not be read.
    #[error("could not decode remote response: {message}")]
    Decode { message: String },

    /// The orchestration's time budget ran out while the attempt was in flight.
    #[error("time budget exhausted while the attempt was in flight")]
    OutOfTime,

    /// Produced by the in-process simulated operation.
    #[error("simulated failure: {message}")]
    Simulated { message: String, retryable: bool },
}

impl AttemptError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout {
            message: msg.into(),
        }
    }

    pub fn rejection(status: u16, body: impl Into<String>) -> Self {
        Self::RemoteRejection {
            status,
            body: body.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Timeout { .. }
            | AttemptError::RemoteRejection { .. }
            | AttemptError::OutOfTime => true,
            AttemptError::Simulated { retryable, .. } => *retryable,
            AttemptError::Transport { .. } | AttemptError::Decode { .. } => false,
        }
    }
}

/// Error surfaced by an orchestration to its synchronous caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// A non-retryable attempt failure terminated the retry sequence.
    #[error("operation failed: {0}")]
    Fatal(AttemptError),

    /// The bounded (non-escalating) variant ran out of attempts.
    #[error("retries exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("escalation queue error: {0}")]
    Queue(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Replayed history disagrees with the decisions being re-derived.
    #[error("non-deterministic replay: {0}")]
    NonDeterministic(String),
}

impl From<DomainError> for OrchestrationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::InvalidRequest(msg),
            DomainError::Conflict(msg) => Self::Journal(msg),
        }
    }
}
