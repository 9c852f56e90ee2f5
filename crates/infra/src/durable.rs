//! Replay-safe execution context.
//!
//! Every non-deterministic input an orchestration consumes (clock reads,
//! attempt outcomes, timers) and every side effect it performs is journalled
//! through a [`DurableContext`]. When an execution is reopened after a crash,
//! the context first hands back the recorded values in order; only once the
//! history is exhausted does it touch the clock or the remote service again.
//!
//! A recorded event that does not match the step being re-derived is reported
//! as [`OrchestrationError::NonDeterministic`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use signet_core::{AttemptOutcome, ExecutionId, ExpectedVersion, OrchestrationError};
use signet_events::{ExecutionState, OrchestrationEvent};

use crate::clock::Clock;
use crate::journal::Journal;

pub struct DurableContext {
    execution_id: ExecutionId,
    journal: Arc<dyn Journal>,
    clock: Arc<dyn Clock>,
    history: Vec<OrchestrationEvent>,
    cursor: usize,
    state: ExecutionState,
}

impl DurableContext {
    /// Open (or resume) the stream of `execution_id`.
    ///
    /// A new stream is started with `started`; an existing stream must have
    /// been started with an identical event.
    pub fn open(
        journal: Arc<dyn Journal>,
        clock: Arc<dyn Clock>,
        execution_id: ExecutionId,
        started: OrchestrationEvent,
    ) -> Result<Self, OrchestrationError> {
        if !matches!(started, OrchestrationEvent::Started { .. }) {
            return Err(OrchestrationError::NonDeterministic(format!(
                "execution must open with 'started', got '{}'",
                started.event_type()
            )));
        }

        let mut records = journal.load(execution_id)?;
        if records.is_empty() {
            records = journal.append(execution_id, vec![started], ExpectedVersion::NoStream)?;
        } else if records[0].payload() != &started {
            return Err(OrchestrationError::NonDeterministic(format!(
                "execution {execution_id} was started with different inputs"
            )));
        }

        let state = ExecutionState::replay(&records)
            .map_err(|e| OrchestrationError::Journal(e.to_string()))?
            .ok_or_else(|| OrchestrationError::Journal("empty stream after open".to_string()))?;

        if records.len() > 1 {
            debug!(
                execution_id = %execution_id,
                recorded = records.len(),
                "resuming execution from journal"
            );
        }

        Ok(Self {
            execution_id,
            journal,
            clock,
            history: records.into_iter().map(|r| r.into_payload()).collect(),
            cursor: 1,
            state,
        })
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Live clock, for deadlines that are never journalled.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// State as recorded so far (includes history not yet replayed).
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// True while recorded history remains to be handed back.
    pub fn is_replaying(&self) -> bool {
        self.cursor < self.history.len()
    }

    /// Current time, recorded once and replayed afterwards.
    pub fn now(&mut self) -> Result<DateTime<Utc>, OrchestrationError> {
        match self.replay_next() {
            Some(OrchestrationEvent::ClockRead { at }) => return Ok(at),
            Some(other) => return Err(self.mismatch("clock_read", &other)),
            None => {}
        }

        let at = self.clock.now();
        self.append(OrchestrationEvent::ClockRead { at })?;
        Ok(at)
    }

    /// Durable timer. A timer that already fired is not slept again.
    pub async fn sleep(&mut self, attempt: u32, delay: Duration) -> Result<(), OrchestrationError> {
        match self.replay_next() {
            Some(OrchestrationEvent::TimerFired {
                attempt: recorded, ..
            }) if recorded == attempt => return Ok(()),
            Some(other) => return Err(self.mismatch("timer_fired", &other)),
            None => {}
        }

        self.clock.sleep(delay).await;
        self.append(OrchestrationEvent::TimerFired { attempt, delay })?;
        Ok(())
    }

    /// Run attempt `attempt` unless its outcome is already recorded.
    pub async fn attempt<F, Fut>(
        &mut self,
        attempt: u32,
        run: F,
    ) -> Result<AttemptOutcome, OrchestrationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        match self.replay_next() {
            Some(OrchestrationEvent::AttemptFinished {
                attempt: recorded,
                outcome,
            }) if recorded == attempt => return Ok(outcome),
            Some(other) => return Err(self.mismatch("attempt_finished", &other)),
            None => {}
        }

        let outcome = run().await;
        self.append(OrchestrationEvent::AttemptFinished {
            attempt,
            outcome: outcome.clone(),
        })?;
        Ok(outcome)
    }

    /// Record a decision, or confirm it against the replayed history.
    pub fn record(&mut self, event: OrchestrationEvent) -> Result<(), OrchestrationError> {
        match self.replay_next() {
            Some(recorded) if recorded.event_type() == event.event_type() => Ok(()),
            Some(other) => Err(self.mismatch(event.event_type(), &other)),
            None => self.append(event),
        }
    }

    /// Hand back the next recorded event, advancing the replay cursor.
    pub(crate) fn replay_next(&mut self) -> Option<OrchestrationEvent> {
        let event = self.history.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(event)
    }

    pub(crate) fn append(&mut self, event: OrchestrationEvent) -> Result<(), OrchestrationError> {
        let version = self.history.len() as u64;
        let committed = self.journal.append(
            self.execution_id,
            vec![event],
            ExpectedVersion::Exact(version),
        )?;

        for record in committed {
            self.state
                .apply(&record)
                .map_err(|e| OrchestrationError::Journal(e.to_string()))?;
            self.history.push(record.into_payload());
        }
        self.cursor = self.history.len();
        Ok(())
    }

    fn mismatch(&self, expected: &str, found: &OrchestrationEvent) -> OrchestrationError {
        OrchestrationError::NonDeterministic(format!(
            "execution {}: expected '{}' at position {}, journal has '{}'",
            self.execution_id,
            expected,
            self.cursor,
            found.event_type()
        ))
    }
}
