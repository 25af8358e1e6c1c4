//! Liveness API Handler
//!
//! Answers as long as the process is up, leader or not.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// GET /healthz
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
