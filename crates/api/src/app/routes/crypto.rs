use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use signet_core::{Operation, OperationRequest, OrchestrationResult};

use crate::app::dto::parse_webhook;
use crate::app::errors::{
    MISSING_MESSAGE, MISSING_SIGNATURE, bad_request, orchestration_error_to_response,
};
use crate::app::services::AppServices;

pub async fn sign(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(message) = params.get("message") else {
        return bad_request(MISSING_MESSAGE);
    };
    let operation = Operation::Sign {
        message: message.clone(),
    };
    let endpoint = services.settings.sign_url.clone();
    run(&services, operation, endpoint, &body).await
}

pub async fn verify(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(message) = params.get("message") else {
        return bad_request(MISSING_MESSAGE);
    };
    let Some(signature) = params.get("signature") else {
        return bad_request(MISSING_SIGNATURE);
    };
    let operation = Operation::Verify {
        message: message.clone(),
        signature: signature.clone(),
    };
    let endpoint = services.settings.verify_url.clone();
    run(&services, operation, endpoint, &body).await
}

async fn run(
    services: &AppServices,
    operation: Operation,
    endpoint: String,
    body: &Bytes,
) -> Response {
    let webhook = match parse_webhook(body) {
        Ok(webhook) => webhook,
        Err(response) => return response,
    };
    let request = OperationRequest::new(operation, services.settings.api_key.clone(), endpoint)
        .with_callback(webhook.webhookurl);

    match services.coordinator.submit(request).await {
        Ok(OrchestrationResult::Completed { payload }) => (StatusCode::OK, payload).into_response(),
        Ok(OrchestrationResult::Pending { execution_id }) => (
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/executions/{execution_id}"))],
        )
            .into_response(),
        Err(e) => orchestration_error_to_response(e),
    }
}
