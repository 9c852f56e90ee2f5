//! Append-only execution journal.
//!
//! Each execution owns one stream of [`OrchestrationEvent`]s. The journal is
//! the source of truth for orchestration state; `ExecutionState` is always
//! derived from it.
//!
//! [`OrchestrationEvent`]: signet_events::OrchestrationEvent

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryJournal;
pub use r#trait::{Journal, JournalError, JournalRecord};
