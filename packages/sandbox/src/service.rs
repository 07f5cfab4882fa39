// ABOUTME: Orchestration facade composing sandbox resolution, deployment, health waits and relay
// ABOUTME: Serializes the deploy region per sandbox id so concurrent callers never double-deploy

use crate::bundle::{ArtifactCache, BundleTarget, DeploymentArtifact};
use crate::config::SandboxConfig;
use crate::deploy::{DeployOutcome, Deployer, WorkerDeployment};
use crate::error::{OrchestratorError, Result};
use crate::executor::{OneShotExecutor, OneShotOutput, SandboxReleaser};
use crate::health::{HealthChecker, HealthPolicy};
use crate::manager::{SandboxManager, DEFAULT_START_TIMEOUT};
use crate::providers::{DaytonaProvider, SandboxHandle, SandboxProvider};
use crate::relay::{RelayStream, StreamRelay, StreamRequest, StreamSession};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Caller request for a streamed exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub messages: Vec<Value>,
    #[serde(rename = "sandboxId", default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub worker_port: u16,
    pub start_timeout: Duration,
    pub health: HealthPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            worker_port: 3213,
            start_timeout: DEFAULT_START_TIMEOUT,
            health: HealthPolicy::default(),
        }
    }
}

/// One async mutex per sandbox id, dropped once nobody holds or waits on it
#[derive(Default)]
pub struct SandboxLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, sandbox_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(sandbox_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Where a fresh stream bundle comes from when its source changes
struct StreamRebuild {
    cache: Arc<ArtifactCache>,
    target: BundleTarget,
}

pub struct SandboxService {
    manager: Arc<SandboxManager>,
    deployer: Deployer,
    health: HealthChecker,
    relay: StreamRelay,
    executor: OneShotExecutor,
    stream_worker: RwLock<WorkerDeployment>,
    stream_rebuild: Option<StreamRebuild>,
    /// Digest of the bundle this service last launched, per sandbox id
    deployed: Mutex<HashMap<String, String>>,
    oneshot_artifacts: HashMap<String, Arc<DeploymentArtifact>>,
    options: ServiceOptions,
    locks: SandboxLocks,
}

impl SandboxService {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        env_vars: HashMap<String, String>,
        stream_artifact: Arc<DeploymentArtifact>,
        options: ServiceOptions,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        let health = HealthChecker::new(client.clone());
        let manager = Arc::new(
            SandboxManager::new(provider.clone(), env_vars)
                .with_start_timeout(options.start_timeout),
        );

        Self {
            deployer: Deployer::new(provider, health.clone()),
            executor: OneShotExecutor::new(manager.clone()),
            relay: StreamRelay::new(client),
            stream_worker: RwLock::new(WorkerDeployment::stream_server(stream_artifact)),
            stream_rebuild: None,
            deployed: Mutex::new(HashMap::new()),
            oneshot_artifacts: HashMap::new(),
            locks: SandboxLocks::new(),
            manager,
            health,
            options,
        }
    }

    /// Daytona-backed service from loaded configuration
    pub fn from_config(
        config: &SandboxConfig,
        stream_artifact: Arc<DeploymentArtifact>,
    ) -> crate::providers::Result<Self> {
        let provider = DaytonaProvider::new(config.api_key.clone(), config.api_url.clone())?;
        let options = ServiceOptions {
            worker_port: config.worker_port,
            start_timeout: config.start_timeout,
            health: config.health.clone(),
        };

        Ok(Self::new(
            Arc::new(provider),
            config.forward_env.clone(),
            stream_artifact,
            options,
        ))
    }

    /// Register a one-shot artifact under its name
    pub fn with_oneshot_artifact(mut self, artifact: Arc<DeploymentArtifact>) -> Self {
        self.oneshot_artifacts.insert(artifact.name.clone(), artifact);
        self
    }

    /// Re-check `target` before each deploy and roll out a rebuilt bundle
    pub fn with_stream_rebuild(
        mut self,
        cache: Arc<ArtifactCache>,
        target: BundleTarget,
    ) -> Self {
        self.stream_rebuild = Some(StreamRebuild { cache, target });
        self
    }

    pub fn oneshot_artifact_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.oneshot_artifacts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Resolve a sandbox, make sure its worker is healthy and relay its stream
    pub async fn run_stream(&self, request: ExecutionRequest) -> Result<StreamSession> {
        let handle = self.manager.resolve(request.sandbox_id.as_deref()).await?;

        // A sandbox created for this call only outlives it once its id reaches the caller
        let created = request
            .sandbox_id
            .is_none()
            .then(|| SandboxReleaser::new(self.manager.provider().clone(), handle.clone()));

        match self.open_stream(&handle, request.messages).await {
            Ok(stream) => {
                if let Some(releaser) = created {
                    releaser.keep();
                }
                info!("Streaming from sandbox {}", handle.id);
                Ok(StreamSession {
                    sandbox_id: handle.id,
                    stream,
                })
            }
            Err(e) => {
                if let Some(releaser) = created {
                    warn!("Stopping sandbox {} created for a failed stream", handle.id);
                    releaser.release().await;
                }
                Err(e)
            }
        }
    }

    async fn open_stream(
        &self,
        handle: &SandboxHandle,
        messages: Vec<Value>,
    ) -> Result<RelayStream> {
        let link = self
            .manager
            .provider()
            .get_preview_link(handle, self.options.worker_port)
            .await
            .map_err(|source| OrchestratorError::PreviewLinkFailed {
                sandbox_id: handle.id.clone(),
                source,
            })?;

        {
            let _guard = self.locks.acquire(&handle.id).await;
            let worker = self.current_stream_worker().await?;
            let digest = &worker.artifact.source_digest;

            let stale = self
                .deployed
                .lock()
                .await
                .get(&handle.id)
                .is_some_and(|deployed| deployed != digest);
            let outcome = if stale {
                info!("Stream bundle changed, redeploying sandbox {}", handle.id);
                self.deployer.launch(handle, &worker).await?
            } else {
                self.deployer.ensure_running(handle, &link, &worker).await?
            };

            if let DeployOutcome::Launched { .. } = outcome {
                self.deployed
                    .lock()
                    .await
                    .insert(handle.id.clone(), digest.clone());
            }
            if outcome.needs_health_wait() {
                self.health
                    .wait_until_healthy(&link, &self.options.health)
                    .await?;
            }
        }

        self.relay.relay(&link, &StreamRequest { messages }).await
    }

    async fn current_stream_worker(&self) -> Result<WorkerDeployment> {
        let Some(rebuild) = &self.stream_rebuild else {
            return Ok(self.stream_worker.read().await.clone());
        };

        let artifact = rebuild
            .cache
            .build_if_changed(&rebuild.target)
            .await
            .map_err(|source| OrchestratorError::BundleFailed { source })?;

        let mut worker = self.stream_worker.write().await;
        if worker.artifact.source_digest != artifact.source_digest {
            info!("Using rebuilt {} bundle {}", artifact.name, artifact.source_digest);
            *worker = WorkerDeployment::stream_server(artifact);
        }
        Ok(worker.clone())
    }

    /// Run a registered one-shot artifact in a throwaway sandbox
    pub async fn run_once(&self, artifact_id: &str) -> Result<OneShotOutput> {
        let artifact = self
            .oneshot_artifacts
            .get(artifact_id)
            .ok_or_else(|| OrchestratorError::ArtifactNotFound(artifact_id.to_string()))?;

        self.executor.run_once(artifact).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::providers::{ProviderError, SandboxHandle, SandboxState};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service(provider: MockProvider) -> SandboxService {
        SandboxService::new(
            Arc::new(provider),
            HashMap::new(),
            Arc::new(DeploymentArtifact::from_bytes("stream", "serve()")),
            ServiceOptions::default(),
        )
    }

    #[test]
    fn test_execution_request_shape() {
        let request: ExecutionRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "sandboxId": "sb-1"
        }))
        .unwrap();
        assert_eq!(request.sandbox_id.as_deref(), Some("sb-1"));

        let request: ExecutionRequest =
            serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(request.sandbox_id.is_none());
    }

    #[tokio::test]
    async fn test_locks_are_per_sandbox_and_pruned() {
        let locks = SandboxLocks::new();

        let first = locks.acquire("sb-1").await;
        let other = locks.acquire("sb-2").await;
        assert_eq!(locks.len().await, 2);

        let contended =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("sb-1")).await;
        assert!(contended.is_err(), "second holder of sb-1 must wait");

        drop(first);
        drop(other);
        let _again = locks.acquire("sb-3").await;
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_artifact() {
        let mut provider = MockProvider::new();
        provider.expect_create().never();

        let result = service(provider).run_once("nope").await;
        match result {
            Err(error @ OrchestratorError::ArtifactNotFound(_)) => {
                assert_eq!(error.status_code(), 404);
            }
            other => panic!("Expected ArtifactNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_preview_link_failure() {
        let mut provider = MockProvider::new();
        provider
            .expect_get()
            .returning(|id| Ok(SandboxHandle::new(id, SandboxState::Started)));
        provider
            .expect_get_preview_link()
            .withf(|_, port| *port == 3213)
            .returning(|_, _| {
                Err(ProviderError::ApiError {
                    status: 502,
                    message: "proxy down".to_string(),
                })
            });
        provider.expect_upload_file().never();

        let result = service(provider)
            .run_stream(ExecutionRequest {
                messages: vec![],
                sandbox_id: Some("sb-1".to_string()),
            })
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::PreviewLinkFailed { ref sandbox_id, .. }) if sandbox_id == "sb-1"
        ));
    }

    #[test]
    fn test_oneshot_registry() {
        let service = service(MockProvider::new())
            .with_oneshot_artifact(Arc::new(DeploymentArtifact::from_bytes("demo", "x")))
            .with_oneshot_artifact(Arc::new(DeploymentArtifact::from_bytes("audit", "y")));

        assert_eq!(service.oneshot_artifact_ids(), vec!["audit", "demo"]);
    }
}
