// ABOUTME: One-shot worker execution in a throwaway sandbox that is always stopped afterwards
// ABOUTME: SandboxReleaser guarantees a single stop on success, failure and cancellation

use crate::bundle::DeploymentArtifact;
use crate::error::{OrchestratorError, Result};
use crate::manager::SandboxManager;
use crate::providers::{SandboxHandle, SandboxProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ONESHOT_REMOTE_PATH: &str = "/tmp/coderun.mjs";

/// Captured output of a one-shot run that exited zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotOutput {
    pub exit_code: i64,
    pub result: String,
}

async fn stop_sandbox(provider: Arc<dyn SandboxProvider>, handle: SandboxHandle) {
    match provider.stop(&handle).await {
        Ok(()) => info!("Released sandbox {}", handle.id),
        Err(e) => warn!("Failed to release sandbox {}: {}", handle.id, e),
    }
}

/// Owns a sandbox for the duration of a one-shot run
///
/// Call [`SandboxReleaser::release`] on every normal path. If the guard is dropped
/// without being released (the owning future was cancelled), the stop is spawned
/// onto the current runtime instead.
pub struct SandboxReleaser {
    provider: Arc<dyn SandboxProvider>,
    handle: SandboxHandle,
    released: bool,
}

impl SandboxReleaser {
    pub fn new(provider: Arc<dyn SandboxProvider>, handle: SandboxHandle) -> Self {
        Self {
            provider,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    /// Stop the sandbox and wait for the provider to answer
    pub async fn release(mut self) {
        self.released = true;
        // Spawned so that cancelling the caller cannot cut the stop short
        let task = tokio::spawn(stop_sandbox(self.provider.clone(), self.handle.clone()));
        if let Err(e) = task.await {
            warn!("Release task for sandbox {} failed: {}", self.handle.id, e);
        }
    }

    /// Hand the sandbox over to the caller without stopping it
    pub fn keep(mut self) -> SandboxHandle {
        self.released = true;
        self.handle.clone()
    }
}

impl Drop for SandboxReleaser {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Releasing sandbox {} after cancellation", self.handle.id);
                runtime.spawn(stop_sandbox(self.provider.clone(), self.handle.clone()));
            }
            Err(_) => warn!(
                "No runtime to release sandbox {}; it is left running",
                self.handle.id
            ),
        }
    }
}

/// Runs a bundle to completion in a fresh sandbox
pub struct OneShotExecutor {
    manager: Arc<SandboxManager>,
    remote_path: String,
}

impl OneShotExecutor {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self {
            manager,
            remote_path: ONESHOT_REMOTE_PATH.to_string(),
        }
    }

    pub async fn run_once(&self, artifact: &DeploymentArtifact) -> Result<OneShotOutput> {
        // Nothing is forwarded into one-shot sandboxes
        let handle = self.manager.create_sandbox(&HashMap::new()).await?;
        let releaser = SandboxReleaser::new(self.manager.provider().clone(), handle);

        let outcome = self.execute(releaser.handle(), artifact).await;
        releaser.release().await;
        outcome
    }

    async fn execute(
        &self,
        handle: &SandboxHandle,
        artifact: &DeploymentArtifact,
    ) -> Result<OneShotOutput> {
        let provider = self.manager.provider();

        provider
            .upload_file(handle, artifact.bytes.clone(), &self.remote_path)
            .await
            .map_err(|source| OrchestratorError::DeployFailed {
                path: self.remote_path.clone(),
                source,
            })?;

        let command = format!("node {}", self.remote_path);
        info!("Running {} in sandbox {}", artifact.name, handle.id);

        let response = provider
            .execute_command(handle, &command)
            .await
            .map_err(|source| OrchestratorError::LaunchFailed { source })?;

        if response.exit_code != 0 {
            return Err(OrchestratorError::WorkerExitedNonZero {
                exit_code: response.exit_code,
                output: response.result,
            });
        }

        Ok(OneShotOutput {
            exit_code: response.exit_code,
            result: response.result,
        })
    }
}
