// ABOUTME: Provider trait and shared types for remote sandbox backends
// ABOUTME: Defines the create/get/start/stop, file, command, session and preview interface

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod daytona;

pub use daytona::DaytonaProvider;

/// Query parameter carrying the preview token on every worker request
pub const PREVIEW_AUTH_PARAM: &str = "DAYTONA_SANDBOX_AUTH_KEY";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Lifecycle state as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxState {
    Creating,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
    Other(String),
}

impl SandboxState {
    pub fn as_str(&self) -> &str {
        match self {
            SandboxState::Creating => "creating",
            SandboxState::Starting => "starting",
            SandboxState::Started => "started",
            SandboxState::Stopping => "stopping",
            SandboxState::Stopped => "stopped",
            SandboxState::Error => "error",
            SandboxState::Other(state) => state,
        }
    }
}

impl From<&str> for SandboxState {
    fn from(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "creating" => SandboxState::Creating,
            "starting" => SandboxState::Starting,
            "started" => SandboxState::Started,
            "stopping" => SandboxState::Stopping,
            "stopped" => SandboxState::Stopped,
            "error" | "build_failed" => SandboxState::Error,
            other => SandboxState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a provider-owned sandbox instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub state: SandboxState,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>, state: SandboxState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state == SandboxState::Started
    }
}

/// Time-limited URL and token granting access to a port inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewLink {
    pub url: String,
    pub token: String,
}

impl PreviewLink {
    /// Build an authenticated URL for `path` on the previewed port
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}{}?{}={}",
            self.url.trim_end_matches('/'),
            path,
            PREVIEW_AUTH_PARAM,
            self.token
        )
    }
}

/// Result of a synchronous one-shot command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub exit_code: i64,
    #[serde(default)]
    pub result: String,
}

/// Command submitted to a named session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCommand {
    pub command: String,
    pub run_async: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCommandResponse {
    pub cmd_id: String,
}

/// Remote sandbox backend
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new sandbox, forwarding `env_vars` into its environment
    async fn create(&self, env_vars: &HashMap<String, String>) -> Result<SandboxHandle>;

    /// Look up an existing sandbox by id
    async fn get(&self, sandbox_id: &str) -> Result<SandboxHandle>;

    /// Start a stopped sandbox and wait up to `timeout` for it to report started
    async fn start(&self, handle: &SandboxHandle, timeout: Duration) -> Result<()>;

    /// Stop a sandbox
    async fn stop(&self, handle: &SandboxHandle) -> Result<()>;

    /// Write `content` to `path` inside the sandbox filesystem
    async fn upload_file(&self, handle: &SandboxHandle, content: Bytes, path: &str)
        -> Result<()>;

    /// Run a command to completion
    async fn execute_command(&self, handle: &SandboxHandle, command: &str)
        -> Result<CommandResponse>;

    /// Create a named, reusable command session
    async fn create_session(&self, handle: &SandboxHandle, session_id: &str) -> Result<()>;

    /// Submit a command to a session
    async fn execute_session_command(
        &self,
        handle: &SandboxHandle,
        session_id: &str,
        command: &SessionCommand,
    ) -> Result<SessionCommandResponse>;

    /// Get a preview link for `port` inside the sandbox
    async fn get_preview_link(&self, handle: &SandboxHandle, port: u16) -> Result<PreviewLink>;
}
