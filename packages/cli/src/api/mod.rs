use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

pub mod health;
pub mod sandbox;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/sandbox/stream", post(sandbox::stream_handler))
        .route("/api/sandbox/run/{artifact_id}", post(sandbox::run_handler))
        .with_state(state)
}
