//! Operation executors: one attempt against the remote service, classified.

pub mod http;
pub mod simulated;

use async_trait::async_trait;

use signet_core::{AttemptOutcome, OperationRequest};

pub use http::HttpOperationExecutor;
pub use simulated::SimulatedOperation;

/// Performs exactly one attempt of the remote operation.
///
/// Implementations keep no per-request state between attempts.
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    async fn attempt(&self, request: &OperationRequest) -> AttemptOutcome;
}
