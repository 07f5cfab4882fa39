// ABOUTME: Sandbox endpoints: streamed worker exchanges and one-shot artifact runs
// ABOUTME: Streams are relayed untouched as text/plain with the serving sandbox id in a header

use crate::error::AppError;
use crate::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use sandrelay_sandbox::{ExecutionRequest, OneShotOutput};
use tracing::info;

pub const SANDBOX_ID_HEADER: &str = "x-sandbox-id";

pub async fn stream_handler(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Response, AppError> {
    validate_stream_request(&request)?;

    let session = state.service.run_stream(request).await?;
    info!("Relaying stream from sandbox {}", session.sandbox_id);

    let sandbox_id = HeaderValue::from_str(&session.sandbox_id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid sandbox id: {}", e)))?;

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (HeaderName::from_static(SANDBOX_ID_HEADER), sandbox_id),
    ];

    Ok((headers, Body::from_stream(session.stream)).into_response())
}

fn validate_stream_request(request: &ExecutionRequest) -> Result<(), AppError> {
    if request.messages.is_empty() {
        return Err(AppError::Validation("messages must not be empty".to_string()));
    }
    if request
        .sandbox_id
        .as_deref()
        .is_some_and(|id| id.trim().is_empty())
    {
        return Err(AppError::Validation("sandboxId must not be blank".to_string()));
    }
    Ok(())
}

pub async fn run_handler(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
) -> Result<Json<OneShotOutput>, AppError> {
    let output = state.service.run_once(&artifact_id).await?;
    Ok(Json(output))
}
