//! Best-effort completion callbacks.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("callback to {url} failed: {message}")]
    Delivery { url: String, message: String },

    #[error("callback client could not be built: {0}")]
    Client(String),
}

/// Delivers a completion payload to a caller-supplied URL.
///
/// Exactly one delivery attempt per call; the caller decides whether a call
/// happens at all.
#[async_trait]
pub trait CallbackDispatcher: Send + Sync {
    async fn deliver(&self, url: &str, payload: &[u8]) -> Result<(), CallbackError>;
}

/// POSTs the raw payload. The receiver's status code is not inspected.
#[derive(Debug, Clone)]
pub struct HttpCallbackDispatcher {
    client: reqwest::Client,
}

impl HttpCallbackDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallbackError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackDispatcher for HttpCallbackDispatcher {
    async fn deliver(&self, url: &str, payload: &[u8]) -> Result<(), CallbackError> {
        match self.client.post(url).body(payload.to_vec()).send().await {
            Ok(response) => {
                info!(url, status = response.status().as_u16(), "callback delivered");
                Ok(())
            }
            Err(e) => {
                warn!(url, error = %e, "callback delivery failed");
                Err(CallbackError::Delivery {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
