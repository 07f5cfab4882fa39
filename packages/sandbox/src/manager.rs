// ABOUTME: Sandbox lifecycle manager resolving a caller's sandbox reference to a running sandbox
// ABOUTME: Reuses and starts existing sandboxes or creates fresh ones with forwarded environment

use crate::error::{OrchestratorError, Result};
use crate::providers::{SandboxHandle, SandboxProvider, SandboxState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// Sandbox lifecycle manager
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    env_vars: HashMap<String, String>,
    start_timeout: Duration,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, env_vars: HashMap<String, String>) -> Self {
        Self {
            provider,
            env_vars,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    pub fn provider(&self) -> &Arc<dyn SandboxProvider> {
        &self.provider
    }

    /// Return a started sandbox: the referenced one, or a new one when `sandbox_id` is absent
    pub async fn resolve(&self, sandbox_id: Option<&str>) -> Result<SandboxHandle> {
        match sandbox_id {
            Some(id) => self.reuse(id).await,
            None => self.create_sandbox(&self.env_vars).await,
        }
    }

    async fn reuse(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let unavailable = |source| OrchestratorError::SandboxUnavailable {
            sandbox_id: sandbox_id.to_string(),
            source,
        };

        let mut handle = self.provider.get(sandbox_id).await.map_err(unavailable)?;
        info!("Reusing sandbox {} (state: {})", handle.id, handle.state);

        if !handle.is_started() {
            info!("Starting sandbox {}", handle.id);
            self.provider
                .start(&handle, self.start_timeout)
                .await
                .map_err(unavailable)?;
            handle.state = SandboxState::Started;
        }

        Ok(handle)
    }

    /// Create a sandbox with `env_vars` in its environment
    pub async fn create_sandbox(&self, env_vars: &HashMap<String, String>) -> Result<SandboxHandle> {
        let handle = self
            .provider
            .create(env_vars)
            .await
            .map_err(|source| OrchestratorError::SandboxCreateFailed { source })?;

        info!(
            "Created sandbox {} with {} forwarded variable(s)",
            handle.id,
            env_vars.len()
        );
        Ok(handle)
    }

    /// Stop a sandbox; failures are logged, never raised
    pub async fn stop(&self, handle: &SandboxHandle) {
        match self.provider.stop(handle).await {
            Ok(()) => info!("Stopped sandbox {}", handle.id),
            Err(e) => warn!("Failed to stop sandbox {}: {}", handle.id, e),
        }
    }
}
