//! Result surfaced synchronously to the caller of an orchestration.

use serde::{Deserialize, Serialize};

use crate::id::ExecutionId;

/// Synchronous answer of the escalation coordinator.
///
/// Fatal failures are reported through `Err(OrchestrationError::Fatal)` rather
/// than a variant here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrchestrationResult {
    /// The fast path reached a terminal answer in time.
    Completed { payload: Vec<u8> },
    /// The request was escalated to a detached execution.
    Pending { execution_id: ExecutionId },
}

impl OrchestrationResult {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}
