//! Outcomes of single attempts and of whole retry sequences.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AttemptError;

/// Classified outcome of one attempt. Produced once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success(Vec<u8>),
    RetryableFailure(AttemptError),
    FatalFailure(AttemptError),
}

impl AttemptOutcome {
    /// Classify an attempt error by its retryability.
    pub fn from_error(error: AttemptError) -> Self {
        if error.is_retryable() {
            Self::RetryableFailure(error)
        } else {
            Self::FatalFailure(error)
        }
    }

    /// Success and fatal failure end a retry sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::RetryableFailure(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RetryableFailure(_) => "retryable_failure",
            Self::FatalFailure(_) => "fatal_failure",
        }
    }
}

impl From<Result<Vec<u8>, AttemptError>> for AttemptOutcome {
    fn from(value: Result<Vec<u8>, AttemptError>) -> Self {
        match value {
            Ok(payload) => Self::Success(payload),
            Err(error) => Self::from_error(error),
        }
    }
}

/// Terminal state of a retry sequence.
///
/// `TimeoutExceeded` means the remote never produced a terminal answer within
/// the policy's bounds; it is distinct from `Fatal`, which means the request
/// itself cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Success {
        payload: Vec<u8>,
        attempts: u32,
    },
    Fatal {
        error: AttemptError,
        attempts: u32,
    },
    TimeoutExceeded {
        attempts: u32,
        elapsed: Duration,
        last_error: Option<AttemptError>,
    },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::Fatal { attempts, .. }
            | Self::TimeoutExceeded { attempts, .. } => *attempts,
        }
    }
}
