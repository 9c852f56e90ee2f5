//! Escalation queue.
//!
//! A fast-path execution that runs out of time hands its request to the queue
//! as an [`EscalationJob`]; an [`EscalationWorker`] picks jobs up and runs the
//! escalated execution detached from the original caller.
//!
//! - `EscalationJob`: queued escalated execution plus claim bookkeeping
//! - `JobStore`: persistence for jobs (in-memory here)
//! - `EscalationWorker`: polls the store and runs jobs with bounded concurrency

pub mod store;
pub mod types;
pub mod worker;

pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{EscalationJob, JobStatus};
pub use worker::{EscalationWorker, WorkerConfig, WorkerHandle, WorkerStats};
