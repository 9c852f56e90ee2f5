use std::sync::Arc;

use anyhow::Context;

use signet_api::app::{self, services::ApiSettings};
use signet_infra::{EscalationWorker, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    signet_observability::init();

    let config = OrchestratorConfig::from_env();
    config.validate().context("invalid orchestrator configuration")?;
    let settings = ApiSettings::from_env()?;

    let services = Arc::new(app::services::build_services(config, settings)?);
    let worker = EscalationWorker::new(services.coordinator.clone()).spawn();

    let bind = std::env::var("SIGNET_BIND").unwrap_or_else(|_| "0.0.0.0:9999".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app::build_app(services))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = worker.shutdown().await;
    tracing::info!(?stats, "shut down");
    Ok(())
}
