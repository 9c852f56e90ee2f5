//! Infrastructure layer: clock, journal, remote calls, retries, escalation.

pub mod callback;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod durable;
pub mod executor;
pub mod jobs;
pub mod journal;
pub mod retry;
pub mod throttle;

pub use callback::{CallbackDispatcher, CallbackError, HttpCallbackDispatcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::OrchestratorConfig;
pub use coordinator::{EscalationCoordinator, Purged};
pub use durable::DurableContext;
pub use executor::{HttpOperationExecutor, RemoteOperation, SimulatedOperation};
pub use jobs::{EscalationJob, EscalationWorker, InMemoryJobStore, JobStore, WorkerHandle};
pub use journal::{InMemoryJournal, Journal, JournalError};
pub use retry::RetryController;
pub use throttle::{AttemptThrottle, ThrottleError};
