use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;

use crate::app::errors::json_error;

/// Optional JSON body of `/sign` and `/verify`.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub webhookurl: String,
}

/// An empty body means "no callback"; anything else must be valid JSON.
pub fn parse_webhook(body: &Bytes) -> Result<WebhookPayload, Response> {
    if body.is_empty() {
        return Ok(WebhookPayload::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_body",
            format!("Error decoding JSON body: {e}"),
        )
    })
}
