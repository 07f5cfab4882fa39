// ABOUTME: Makes sure a healthy worker process is serving inside a sandbox
// ABOUTME: Uploads the worker bundle and relaunches it in a named session when the probe fails

use crate::bundle::DeploymentArtifact;
use crate::error::{OrchestratorError, Result};
use crate::health::HealthChecker;
use crate::providers::{PreviewLink, SandboxHandle, SandboxProvider, SessionCommand};
use std::sync::Arc;
use tracing::{debug, info};

pub const STREAM_REMOTE_PATH: &str = "/tmp/coderunStream.mjs";
pub const STREAM_SESSION: &str = "stream-server";

/// What to upload and how to (re)launch it
#[derive(Debug, Clone)]
pub struct WorkerDeployment {
    pub artifact: Arc<DeploymentArtifact>,
    pub remote_path: String,
    pub session_name: String,
    pub launch_command: String,
    /// Best-effort cleanup of a previous instance; must not fail when nothing is running
    pub kill_command: String,
}

impl WorkerDeployment {
    /// Streaming worker at its well-known path and session
    pub fn stream_server(artifact: Arc<DeploymentArtifact>) -> Self {
        let process = STREAM_REMOTE_PATH.rsplit('/').next().unwrap_or(STREAM_REMOTE_PATH);
        Self {
            artifact,
            remote_path: STREAM_REMOTE_PATH.to_string(),
            session_name: STREAM_SESSION.to_string(),
            launch_command: format!("node {}", STREAM_REMOTE_PATH),
            kill_command: format!("pkill -f {} || true", process),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Probe succeeded; nothing was uploaded or launched
    AlreadyRunning,
    /// Worker was (re)launched and still has to pass a health wait
    Launched { cmd_id: String },
}

impl DeployOutcome {
    pub fn needs_health_wait(&self) -> bool {
        matches!(self, DeployOutcome::Launched { .. })
    }
}

pub struct Deployer {
    provider: Arc<dyn SandboxProvider>,
    health: HealthChecker,
}

impl Deployer {
    pub fn new(provider: Arc<dyn SandboxProvider>, health: HealthChecker) -> Self {
        Self { provider, health }
    }

    pub async fn ensure_running(
        &self,
        handle: &SandboxHandle,
        link: &PreviewLink,
        deployment: &WorkerDeployment,
    ) -> Result<DeployOutcome> {
        if self.health.probe(link).await {
            debug!("Worker in sandbox {} already healthy", handle.id);
            return Ok(DeployOutcome::AlreadyRunning);
        }

        self.launch(handle, deployment).await
    }

    /// Upload and (re)launch without probing first
    pub async fn launch(
        &self,
        handle: &SandboxHandle,
        deployment: &WorkerDeployment,
    ) -> Result<DeployOutcome> {
        info!(
            "Deploying {} to sandbox {} at {}",
            deployment.artifact.name, handle.id, deployment.remote_path
        );

        self.provider
            .upload_file(
                handle,
                deployment.artifact.bytes.clone(),
                &deployment.remote_path,
            )
            .await
            .map_err(|source| OrchestratorError::DeployFailed {
                path: deployment.remote_path.clone(),
                source,
            })?;

        if let Err(e) = self
            .provider
            .execute_command(handle, &deployment.kill_command)
            .await
        {
            debug!("Ignoring kill failure in sandbox {}: {}", handle.id, e);
        }

        // The session survives from earlier launches
        if let Err(e) = self
            .provider
            .create_session(handle, &deployment.session_name)
            .await
        {
            debug!(
                "Session {} not created in sandbox {}: {}",
                deployment.session_name, handle.id, e
            );
        }

        let command = SessionCommand {
            command: deployment.launch_command.clone(),
            run_async: true,
        };
        let response = self
            .provider
            .execute_session_command(handle, &deployment.session_name, &command)
            .await
            .map_err(|source| OrchestratorError::LaunchFailed { source })?;

        info!(
            "Launched worker in sandbox {} (session: {}, cmd: {})",
            handle.id, deployment.session_name, response.cmd_id
        );

        Ok(DeployOutcome::Launched {
            cmd_id: response.cmd_id,
        })
    }
}
