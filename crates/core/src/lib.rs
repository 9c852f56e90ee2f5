//! `signet-core`: domain vocabulary for the signing relay.
//!
//! This crate contains **pure domain** primitives (no IO, no clocks, no runtime).

pub mod error;
pub mod id;
pub mod outcome;
pub mod policy;
pub mod request;
pub mod result;
pub mod version;

pub use error::{AttemptError, DomainError, DomainResult, OrchestrationError};
pub use id::{ExecutionId, RequestId};
pub use outcome::{AttemptOutcome, RetryOutcome};
pub use policy::RetryPolicy;
pub use request::{Operation, OperationRequest, Phase, VERIFIED_BODY};
pub use result::OrchestrationResult;
pub use version::ExpectedVersion;
