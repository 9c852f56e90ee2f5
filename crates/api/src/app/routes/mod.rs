use axum::{
    Router,
    routing::{any, get},
};

pub mod crypto;
pub mod executions;
pub mod system;

/// Router for the operation endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/sign", any(crypto::sign))
        .route("/verify", any(crypto::verify))
        .route("/executions/:id", get(executions::get_execution))
}
