use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use signet_core::{AttemptError, AttemptOutcome, ExecutionId, OperationRequest, Phase, RetryPolicy};

/// A fact recorded in an execution's journal.
///
/// Every non-deterministic input (clock reads, attempt results, timers) and
/// every externally visible side effect (escalation, callback) is journalled
/// so that a resumed execution re-derives the same decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Started {
        request: OperationRequest,
        phase: Phase,
        policy: RetryPolicy,
        parent: Option<ExecutionId>,
    },
    ClockRead {
        at: DateTime<Utc>,
    },
    AttemptFinished {
        attempt: u32,
        outcome: AttemptOutcome,
    },
    TimerFired {
        attempt: u32,
        delay: Duration,
    },
    /// Fast path handed over to a detached execution. Terminal for the fast path.
    Escalated {
        child: ExecutionId,
    },
    /// Recorded before the callback is sent; its presence forbids a resend.
    CallbackIntended {
        url: String,
    },
    CallbackFinished {
        delivered: bool,
        error: Option<String>,
    },
    Succeeded {
        payload: Vec<u8>,
    },
    Failed {
        error: AttemptError,
    },
    TimedOut {
        attempts: u32,
        last_error: Option<AttemptError>,
    },
}

impl OrchestrationEvent {
    /// Stable event type identifier.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrchestrationEvent::Started { .. } => "started",
            OrchestrationEvent::ClockRead { .. } => "clock_read",
            OrchestrationEvent::AttemptFinished { .. } => "attempt_finished",
            OrchestrationEvent::TimerFired { .. } => "timer_fired",
            OrchestrationEvent::Escalated { .. } => "escalated",
            OrchestrationEvent::CallbackIntended { .. } => "callback_intended",
            OrchestrationEvent::CallbackFinished { .. } => "callback_finished",
            OrchestrationEvent::Succeeded { .. } => "succeeded",
            OrchestrationEvent::Failed { .. } => "failed",
            OrchestrationEvent::TimedOut { .. } => "timed_out",
        }
    }
}
