//! Inbound operation requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::RequestId;

/// Synchronous body of a successful verification.
pub const VERIFIED_BODY: &str = "Signature verified as valid!";

/// The remote cryptographic operation to perform (opaque to the orchestrator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    Sign { message: String },
    Verify { message: String, signature: String },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Sign { .. } => "sign",
            Operation::Verify { .. } => "verify",
        }
    }

    /// Body returned to a synchronous caller once the remote succeeded.
    ///
    /// A verification's remote body is only forwarded by callback; the
    /// synchronous answer is a fixed confirmation.
    pub fn completed_body(&self, remote: Vec<u8>) -> Vec<u8> {
        match self {
            Operation::Sign { .. } => remote,
            Operation::Verify { .. } => VERIFIED_BODY.as_bytes().to_vec(),
        }
    }

    /// Query parameters sent to the remote service, in a stable order.
    pub fn query_params(&self) -> Vec<(&'static str, &str)> {
        match self {
            Operation::Sign { message } => vec![("message", message.as_str())],
            Operation::Verify { message, signature } => vec![
                ("message", message.as_str()),
                ("signature", signature.as_str()),
            ],
        }
    }
}

/// Which execution of an orchestration is running.
///
/// The escalation decision is driven by this flag alone, never by comparing
/// time budgets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FastPath,
    Escalated,
    /// Fixed-interval execution with a bounded attempt count; never escalates.
    Bounded,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::FastPath => "fast_path",
            Phase::Escalated => "escalated",
            Phase::Bounded => "bounded",
        }
    }
}

/// A request to run an operation against the remote service.
///
/// Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    id: RequestId,
    operation: Operation,
    credential: String,
    endpoint: String,
    callback_url: Option<String>,
    time_budget: Option<Duration>,
}

impl OperationRequest {
    pub fn new(
        operation: Operation,
        credential: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            operation,
            credential: credential.into(),
            endpoint: endpoint.into(),
            callback_url: None,
            time_budget: None,
        }
    }

    /// Address that receives the escalated result. Empty strings mean "none".
    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.callback_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    /// Fast-path budget overriding the configured default.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(DomainError::validation("endpoint must not be empty"));
        }
        if self.time_budget.is_some_and(|b| b.is_zero()) {
            return Err(DomainError::validation("time budget must be > 0"));
        }
        Ok(())
    }
}
