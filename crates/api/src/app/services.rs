//! Orchestrator wiring for the HTTP front end.

use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use signet_infra::{
    EscalationCoordinator, HttpCallbackDispatcher, HttpOperationExecutor, OrchestratorConfig,
};

const DEFAULT_SIGN_URL: &str = "http://127.0.0.1:8000/crypto/sign";
const DEFAULT_VERIFY_URL: &str = "http://127.0.0.1:8000/crypto/verify";

/// Front-end settings: where the remote service lives and how to authenticate.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub sign_url: String,
    pub verify_url: String,
}

impl ApiSettings {
    /// `SIGNET_API_KEY` is required; the remote URLs fall back to local defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("SIGNET_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .context("SIGNET_API_KEY must be set")?;

        let sign_url = std::env::var("SIGNET_SIGN_URL").unwrap_or_else(|_| {
            warn!("SIGNET_SIGN_URL not set; using {DEFAULT_SIGN_URL}");
            DEFAULT_SIGN_URL.to_string()
        });
        let verify_url = std::env::var("SIGNET_VERIFY_URL").unwrap_or_else(|_| {
            warn!("SIGNET_VERIFY_URL not set; using {DEFAULT_VERIFY_URL}");
            DEFAULT_VERIFY_URL.to_string()
        });

        Ok(Self {
            api_key,
            sign_url,
            verify_url,
        })
    }
}

/// Shared state of every handler.
pub struct AppServices {
    pub coordinator: Arc<EscalationCoordinator>,
    pub settings: ApiSettings,
}

/// Wire HTTP remote calls and callbacks into a coordinator.
pub fn build_services(
    config: OrchestratorConfig,
    settings: ApiSettings,
) -> anyhow::Result<AppServices> {
    let operation = HttpOperationExecutor::new(config.attempt_timeout)
        .context("failed to build remote service client")?;
    let callbacks = HttpCallbackDispatcher::new(config.callback_timeout)
        .context("failed to build callback client")?;

    let coordinator = EscalationCoordinator::new(config, Arc::new(operation), Arc::new(callbacks))
        .context("failed to build escalation coordinator")?;

    Ok(with_coordinator(coordinator, settings))
}

pub fn with_coordinator(coordinator: EscalationCoordinator, settings: ApiSettings) -> AppServices {
    AppServices {
        coordinator: Arc::new(coordinator),
        settings,
    }
}
