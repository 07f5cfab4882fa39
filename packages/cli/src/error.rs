// ABOUTME: HTTP error type mapping orchestration failures to status codes and JSON bodies
// ABOUTME: Every failure renders as {success: false, error: {code, message}}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sandrelay_sandbox::OrchestratorError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Main application error type that all handlers return
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl AppError {
    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Orchestrator(e) => (
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.code(),
            ),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = self.to_status_and_code();

        match &self {
            AppError::Internal(err) => error!(error = %err, "Internal server error occurred"),
            AppError::Orchestrator(err) if status_code.is_server_error() => {
                error!(code = error_code, error = %err, "Sandbox orchestration failed")
            }
            other => warn!(code = error_code, error = %other, "Request rejected"),
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: error_code.to_string(),
                message: self.to_string(),
            },
        };

        (status_code, Json(body)).into_response()
    }
}
