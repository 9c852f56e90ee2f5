use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use tracing::debug;

use signet_core::{AttemptError, AttemptOutcome, OperationRequest};

use super::RemoteOperation;

/// Calls the remote service over HTTP.
///
/// One `GET <endpoint>?<params>` per attempt, credential in `Authorization`.
///
/// Classification:
/// - dial/connect/request-construction failure: fatal
/// - client-side timeout: retryable
/// - non-2xx status: retryable
/// - unreadable body: fatal
#[derive(Debug, Clone)]
pub struct HttpOperationExecutor {
    client: reqwest::Client,
}

impl HttpOperationExecutor {
    pub fn new(attempt_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(attempt_timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteOperation for HttpOperationExecutor {
    async fn attempt(&self, request: &OperationRequest) -> AttemptOutcome {
        let sent = self
            .client
            .get(request.endpoint())
            .query(&request.operation().query_params())
            .header(AUTHORIZATION, request.credential())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return AttemptOutcome::from_error(AttemptError::timeout(e.to_string()));
            }
            Err(e) => {
                return AttemptOutcome::FatalFailure(AttemptError::transport(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "remote rejected attempt");
            return AttemptOutcome::RetryableFailure(AttemptError::rejection(status.as_u16(), body));
        }

        match response.bytes().await {
            Ok(body) => AttemptOutcome::Success(body.to_vec()),
            Err(e) if e.is_timeout() => {
                AttemptOutcome::from_error(AttemptError::timeout(e.to_string()))
            }
            Err(e) => AttemptOutcome::FatalFailure(AttemptError::decode(e.to_string())),
        }
    }
}
