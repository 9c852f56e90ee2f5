//! Orchestration event log vocabulary and the state machine rebuilt from it.

pub mod envelope;
pub mod event;
pub mod state;

pub use envelope::EventEnvelope;
pub use event::OrchestrationEvent;
pub use state::{CallbackState, ExecutionState, ExecutionStatus, TransitionError};
