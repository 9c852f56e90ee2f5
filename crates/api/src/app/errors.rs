use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use signet_core::OrchestrationError;

pub const MISSING_MESSAGE: &str = "Must specify a message.";
pub const MISSING_SIGNATURE: &str = "Must specify a signature.";
const UNAVAILABLE: &str = "internal server error";

pub fn orchestration_error_to_response(err: OrchestrationError) -> Response {
    match err {
        OrchestrationError::InvalidRequest(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_request", msg)
        }
        other => {
            error!(error = %other, "orchestration failed");
            (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE).into_response()
        }
    }
}

pub fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
