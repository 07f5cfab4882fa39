// ABOUTME: Liveness endpoint for the sandrelay server
// ABOUTME: Reports service name, version and the registered one-shot artifacts

use crate::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    Json(json!({
        "status": "healthy",
        "timestamp": timestamp,
        "version": env!("CARGO_PKG_VERSION"),
        "service": "sandrelay",
        "artifacts": state.service.oneshot_artifact_ids(),
    }))
}
