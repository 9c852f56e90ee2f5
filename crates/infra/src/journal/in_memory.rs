use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use signet_core::{ExecutionId, ExpectedVersion};
use signet_events::{CallbackState, EventEnvelope, ExecutionState, OrchestrationEvent};

use super::r#trait::{Journal, JournalError, JournalRecord};
use crate::clock::{Clock, SystemClock};

/// In-memory append-only journal.
///
/// Intended for tests/dev. A durable backend implements the same trait.
pub struct InMemoryJournal {
    streams: RwLock<HashMap<ExecutionId, Vec<JournalRecord>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp `recorded_at` from the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn current_version(stream: &[JournalRecord]) -> u64 {
        stream.last().map(|e| e.sequence_number()).unwrap_or(0)
    }

    /// Number of streams held, finished or not.
    pub fn len(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_expired(stream: &[JournalRecord], finished_before: DateTime<Utc>) -> bool {
    let Some(last) = stream.last() else {
        return true;
    };
    if last.recorded_at() >= finished_before {
        return false;
    }
    match ExecutionState::replay(stream) {
        Ok(Some(state)) => {
            state.status().is_terminal()
                && !matches!(state.callback(), CallbackState::Intended { .. })
        }
        _ => false,
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJournal").finish_non_exhaustive()
    }
}

impl Journal for InMemoryJournal {
    fn append(
        &self,
        execution_id: ExecutionId,
        events: Vec<OrchestrationEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<JournalRecord>, JournalError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| JournalError::Storage("lock poisoned".to_string()))?;

        let stream = streams.entry(execution_id).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(JournalError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if current == 0 && !matches!(events[0], OrchestrationEvent::Started { .. }) {
            return Err(JournalError::InvalidAppend(format!(
                "stream must begin with 'started', got '{}'",
                events[0].event_type()
            )));
        }

        let recorded_at = self.clock.now();
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            let record = EventEnvelope::new(Uuid::now_v7(), execution_id, next, recorded_at, event);
            next += 1;
            stream.push(record.clone());
            committed.push(record);
        }

        Ok(committed)
    }

    fn load(&self, execution_id: ExecutionId) -> Result<Vec<JournalRecord>, JournalError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| JournalError::Storage("lock poisoned".to_string()))?;

        Ok(streams.get(&execution_id).cloned().unwrap_or_default())
    }

    fn purge(&self, finished_before: DateTime<Utc>) -> Result<usize, JournalError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| JournalError::Storage("lock poisoned".to_string()))?;

        let held = streams.len();
        streams.retain(|_, stream| !is_expired(stream, finished_before));
        Ok(held - streams.len())
    }
}
