//! `GET /health` on the relay listener.
//!
//! The answer is fixed and never consults the broker, so the endpoint stays up
//! while the relay is degraded.

use axum::response::Json;
use serde_json::json;

pub const HEALTH_PATH: &str = "/health";

pub fn health_body() -> serde_json::Value {
    json!({ "status": "ok", "service": "broker-service" })
}

/// GET /health
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(health_body())
}
