// ABOUTME: Error taxonomy for sandbox orchestration calls
// ABOUTME: One variant per failure kind, each with a stable code and an HTTP status

use crate::bundle::BundleError;
use crate::providers::ProviderError;
use thiserror::Error;

/// Failure of one orchestration call (or of a relayed stream item)
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to create sandbox: {source}")]
    SandboxCreateFailed {
        #[source]
        source: ProviderError,
    },

    #[error("Sandbox {sandbox_id} is unavailable: {source}")]
    SandboxUnavailable {
        sandbox_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to get preview link for sandbox {sandbox_id}: {source}")]
    PreviewLinkFailed {
        sandbox_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to upload worker bundle to {path}: {source}")]
    DeployFailed {
        path: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to launch worker: {source}")]
    LaunchFailed {
        #[source]
        source: ProviderError,
    },

    #[error("Worker not healthy after {attempts} attempts: {last_error}")]
    HealthCheckTimeout { attempts: u32, last_error: String },

    #[error("Failed to connect to worker stream: {message}")]
    RelayFailed {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Worker exited {exit_code}: {output}")]
    WorkerExitedNonZero { exit_code: i64, output: String },

    #[error("Worker stream interrupted: {message}")]
    RelayStreamInterrupted {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Failed to rebuild worker bundle: {source}")]
    BundleFailed {
        #[source]
        source: BundleError,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// HTTP status reported to callers of the outer request layer
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::HealthCheckTimeout { .. } => 503,
            OrchestratorError::ArtifactNotFound(_) => 404,
            _ => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::SandboxCreateFailed { .. } => "SANDBOX_CREATE_FAILED",
            OrchestratorError::SandboxUnavailable { .. } => "SANDBOX_UNAVAILABLE",
            OrchestratorError::PreviewLinkFailed { .. } => "PREVIEW_LINK_FAILED",
            OrchestratorError::DeployFailed { .. } => "DEPLOY_FAILED",
            OrchestratorError::LaunchFailed { .. } => "LAUNCH_FAILED",
            OrchestratorError::HealthCheckTimeout { .. } => "HEALTH_CHECK_TIMEOUT",
            OrchestratorError::RelayFailed { .. } => "RELAY_FAILED",
            OrchestratorError::WorkerExitedNonZero { .. } => "WORKER_EXITED_NON_ZERO",
            OrchestratorError::RelayStreamInterrupted { .. } => "RELAY_STREAM_INTERRUPTED",
            OrchestratorError::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            OrchestratorError::BundleFailed { .. } => "BUNDLE_FAILED",
        }
    }
}
