//! Explicit execution state machine.
//!
//! `FastPath: Running -> {Succeeded, Failed, Escalated}`
//! `Escalated: Running -> {Succeeded, Failed, TimedOut}`, then optionally one
//! callback (`Intended -> Delivered | Failed`) after success.
//!
//! The state is never stored on its own; it is rebuilt by folding the journal,
//! so a resumed execution sees exactly what was decided before the crash.

use serde::Serialize;
use thiserror::Error;

use signet_core::{ExecutionId, Phase, RequestId};

use crate::{EventEnvelope, OrchestrationEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Escalated { child: ExecutionId },
    Succeeded,
    Failed { error: String },
    TimedOut { attempts: u32 },
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallbackState {
    NotRequested,
    Intended { url: String },
    Delivered { url: String },
    Failed { url: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("stream must begin with a started event, found '{0}'")]
    NotStarted(&'static str),
    #[error("execution already started")]
    AlreadyStarted,
    #[error("event '{event}' not allowed while {status:?}")]
    InvalidTransition {
        event: &'static str,
        status: ExecutionStatus,
    },
    #[error("only a fast-path execution may escalate")]
    EscalationNotAllowed,
    #[error("callback already recorded for this execution")]
    DuplicateCallback,
    #[error("attempt {found} recorded out of order (expected {expected})")]
    AttemptOutOfOrder { expected: u32, found: u32 },
    #[error("sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
    #[error("event belongs to execution {found}, not {expected}")]
    ExecutionMismatch {
        expected: ExecutionId,
        found: ExecutionId,
    },
}

/// Persisted state of one execution, derived from its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    execution_id: ExecutionId,
    request_id: RequestId,
    operation: &'static str,
    phase: Phase,
    parent: Option<ExecutionId>,
    status: ExecutionStatus,
    attempts: u32,
    callback_configured: bool,
    callback: CallbackState,
    version: u64,
}

impl ExecutionState {
    /// Create the state from the first event of a stream.
    pub fn start(envelope: &EventEnvelope<OrchestrationEvent>) -> Result<Self, TransitionError> {
        if envelope.sequence_number() != 1 {
            return Err(TransitionError::SequenceGap {
                expected: 1,
                found: envelope.sequence_number(),
            });
        }

        match envelope.payload() {
            OrchestrationEvent::Started {
                request,
                phase,
                parent,
                ..
            } => Ok(Self {
                execution_id: envelope.execution_id(),
                request_id: request.id(),
                operation: request.operation().name(),
                phase: *phase,
                parent: *parent,
                status: ExecutionStatus::Running,
                attempts: 0,
                callback_configured: request.callback_url().is_some(),
                callback: CallbackState::NotRequested,
                version: 1,
            }),
            other => Err(TransitionError::NotStarted(other.event_type())),
        }
    }

    /// Rebuild state from a full stream. `Ok(None)` for an empty stream.
    pub fn replay<'a>(
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<OrchestrationEvent>>,
    ) -> Result<Option<Self>, TransitionError> {
        let mut iter = envelopes.into_iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };

        let mut state = Self::start(first)?;
        for envelope in iter {
            state.apply(envelope)?;
        }
        Ok(Some(state))
    }

    /// Apply the next event of the stream, enforcing legal transitions.
    pub fn apply(
        &mut self,
        envelope: &EventEnvelope<OrchestrationEvent>,
    ) -> Result<(), TransitionError> {
        if envelope.execution_id() != self.execution_id {
            return Err(TransitionError::ExecutionMismatch {
                expected: self.execution_id,
                found: envelope.execution_id(),
            });
        }
        if envelope.sequence_number() != self.version + 1 {
            return Err(TransitionError::SequenceGap {
                expected: self.version + 1,
                found: envelope.sequence_number(),
            });
        }

        let event = envelope.payload();
        match event {
            OrchestrationEvent::Started { .. } => return Err(TransitionError::AlreadyStarted),
            OrchestrationEvent::ClockRead { .. } | OrchestrationEvent::TimerFired { .. } => {
                self.require_running(event)?;
            }
            OrchestrationEvent::AttemptFinished { attempt, .. } => {
                self.require_running(event)?;
                if *attempt != self.attempts + 1 {
                    return Err(TransitionError::AttemptOutOfOrder {
                        expected: self.attempts + 1,
                        found: *attempt,
                    });
                }
                self.attempts = *attempt;
            }
            OrchestrationEvent::Escalated { child } => {
                if self.phase != Phase::FastPath {
                    return Err(TransitionError::EscalationNotAllowed);
                }
                self.require_running(event)?;
                self.status = ExecutionStatus::Escalated { child: *child };
            }
            OrchestrationEvent::CallbackIntended { url } => {
                if self.phase != Phase::Escalated || self.status != ExecutionStatus::Succeeded {
                    return Err(self.invalid(event));
                }
                if self.callback != CallbackState::NotRequested {
                    return Err(TransitionError::DuplicateCallback);
                }
                self.callback = CallbackState::Intended { url: url.clone() };
            }
            OrchestrationEvent::CallbackFinished { delivered, error } => {
                let CallbackState::Intended { url } = &self.callback else {
                    return Err(self.invalid(event));
                };
                self.callback = if *delivered {
                    CallbackState::Delivered { url: url.clone() }
                } else {
                    CallbackState::Failed {
                        url: url.clone(),
                        error: error.clone().unwrap_or_default(),
                    }
                };
            }
            OrchestrationEvent::Succeeded { .. } => {
                self.require_running(event)?;
                self.status = ExecutionStatus::Succeeded;
            }
            OrchestrationEvent::Failed { error } => {
                self.require_running(event)?;
                self.status = ExecutionStatus::Failed {
                    error: error.to_string(),
                };
            }
            OrchestrationEvent::TimedOut { attempts, .. } => {
                self.require_running(event)?;
                self.status = ExecutionStatus::TimedOut {
                    attempts: *attempts,
                };
            }
        }

        self.version = envelope.sequence_number();
        Ok(())
    }

    fn require_running(&self, event: &OrchestrationEvent) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            Err(self.invalid(event))
        } else {
            Ok(())
        }
    }

    fn invalid(&self, event: &OrchestrationEvent) -> TransitionError {
        TransitionError::InvalidTransition {
            event: event.event_type(),
            status: self.status.clone(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn parent(&self) -> Option<ExecutionId> {
        self.parent
    }

    pub fn status(&self) -> &ExecutionStatus {
        &self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn callback(&self) -> &CallbackState {
        &self.callback
    }

    pub fn callback_configured(&self) -> bool {
        self.callback_configured
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signet_core::{AttemptError, AttemptOutcome, Operation, OperationRequest, RetryPolicy};
    use uuid::Uuid;

    struct Stream {
        id: ExecutionId,
        events: Vec<EventEnvelope<OrchestrationEvent>>,
    }

    impl Stream {
        fn new(phase: Phase) -> Self {
            let request = OperationRequest::new(
                Operation::Sign {
                    message: "hello".into(),
                },
                "key",
                "http://remote/sign",
            )
            .with_callback("http://hook");
            let mut stream = Self {
                id: ExecutionId::new(),
                events: Vec::new(),
            };
            stream.push(OrchestrationEvent::Started {
                request,
                phase,
                policy: RetryPolicy::default(),
                parent: None,
            });
            stream
        }

        fn push(&mut self, event: OrchestrationEvent) -> &mut Self {
            let seq = self.events.len() as u64 + 1;
            self.events
                .push(EventEnvelope::new(Uuid::now_v7(), self.id, seq, Utc::now(), event));
            self
        }

        fn replay(&self) -> Result<Option<ExecutionState>, TransitionError> {
            ExecutionState::replay(&self.events)
        }
    }

    fn retryable(attempt: u32) -> OrchestrationEvent {
        OrchestrationEvent::AttemptFinished {
            attempt,
            outcome: AttemptOutcome::RetryableFailure(AttemptError::rejection(503, "busy")),
        }
    }

    #[test]
    fn empty_stream_has_no_state() {
        let empty: Vec<EventEnvelope<OrchestrationEvent>> = Vec::new();
        assert_eq!(ExecutionState::replay(&empty).unwrap(), None);
    }

    #[test]
    fn fast_path_escalates_once() {
        let mut stream = Stream::new(Phase::FastPath);
        stream
            .push(retryable(1))
            .push(OrchestrationEvent::Escalated {
                child: ExecutionId::new(),
            });

        let state = stream.replay().unwrap().unwrap();
        assert!(matches!(state.status(), ExecutionStatus::Escalated { .. }));
        assert_eq!(state.attempts(), 1);

        stream.push(OrchestrationEvent::Escalated {
            child: ExecutionId::new(),
        });
        assert!(matches!(
            stream.replay(),
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn escalated_execution_cannot_escalate_again() {
        let mut stream = Stream::new(Phase::Escalated);
        stream.push(OrchestrationEvent::Escalated {
            child: ExecutionId::new(),
        });
        assert_eq!(stream.replay(), Err(TransitionError::EscalationNotAllowed));
    }

    #[test]
    fn callback_is_recorded_at_most_once() {
        let mut stream = Stream::new(Phase::Escalated);
        stream
            .push(retryable(1))
            .push(OrchestrationEvent::AttemptFinished {
                attempt: 2,
                outcome: AttemptOutcome::Success(b"sig".to_vec()),
            })
            .push(OrchestrationEvent::Succeeded {
                payload: b"sig".to_vec(),
            })
            .push(OrchestrationEvent::CallbackIntended {
                url: "http://hook".into(),
            })
            .push(OrchestrationEvent::CallbackFinished {
                delivered: true,
                error: None,
            });

        let state = stream.replay().unwrap().unwrap();
        assert_eq!(
            state.callback(),
            &CallbackState::Delivered {
                url: "http://hook".into()
            }
        );

        stream.push(OrchestrationEvent::CallbackIntended {
            url: "http://hook".into(),
        });
        assert_eq!(stream.replay(), Err(TransitionError::DuplicateCallback));
    }

    #[test]
    fn callback_requires_success() {
        let mut stream = Stream::new(Phase::Escalated);
        stream
            .push(OrchestrationEvent::Failed {
                error: AttemptError::transport("refused"),
            })
            .push(OrchestrationEvent::CallbackIntended {
                url: "http://hook".into(),
            });
        assert!(matches!(
            stream.replay(),
            Err(TransitionError::InvalidTransition {
                event: "callback_intended",
                ..
            })
        ));
    }

    #[test]
    fn attempts_must_be_sequential() {
        let mut stream = Stream::new(Phase::FastPath);
        stream.push(retryable(2));
        assert_eq!(
            stream.replay(),
            Err(TransitionError::AttemptOutOfOrder {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn stream_must_start_with_started() {
        let id = ExecutionId::new();
        let events = vec![EventEnvelope::new(
            Uuid::now_v7(),
            id,
            1,
            Utc::now(),
            OrchestrationEvent::ClockRead { at: Utc::now() },
        )];
        assert_eq!(
            ExecutionState::replay(&events),
            Err(TransitionError::NotStarted("clock_read"))
        );
    }
}
