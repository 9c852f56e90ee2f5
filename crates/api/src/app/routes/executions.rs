use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use signet_core::ExecutionId;

use crate::app::errors::{json_error, orchestration_error_to_response};
use crate::app::services::AppServices;

/// Journal-derived state of one execution. Does not expose the result payload.
pub async fn get_execution(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let execution_id: ExecutionId = match id.parse() {
        Ok(id) => id,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    match services.coordinator.execution_state(execution_id) {
        Ok(Some(state)) => Json(state).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        Err(e) => orchestration_error_to_response(e),
    }
}
