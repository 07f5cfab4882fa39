// ABOUTME: Sandbox orchestration core for sandrelay
// ABOUTME: Provisions sandboxes, keeps a healthy worker deployed in them and relays its byte stream

pub mod bundle;
pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod health;
pub mod manager;
pub mod providers;
pub mod relay;
pub mod service;

pub use bundle::{ArtifactCache, BundleBuilder, BundleError, BundleTarget, DeploymentArtifact};
pub use config::{ConfigError, SandboxConfig};
pub use deploy::{DeployOutcome, Deployer, WorkerDeployment};
pub use error::{OrchestratorError, Result};
pub use executor::{OneShotExecutor, OneShotOutput, SandboxReleaser};
pub use health::{HealthChecker, HealthPolicy};
pub use manager::SandboxManager;
pub use providers::{
    DaytonaProvider, PreviewLink, ProviderError, SandboxHandle, SandboxProvider, SandboxState,
};
pub use relay::{RelayStream, StreamRelay, StreamRequest, StreamSession, WorkerEvent, WorkerEventDecoder};
pub use service::{ExecutionRequest, SandboxLocks, SandboxService, ServiceOptions};
