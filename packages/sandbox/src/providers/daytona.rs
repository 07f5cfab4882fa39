// ABOUTME: Daytona provider backed by the Daytona REST and toolbox APIs
// ABOUTME: Handles sandbox lifecycle, file upload, command execution, sessions and preview links

use super::{
    CommandResponse, PreviewLink, ProviderError, Result, SandboxHandle, SandboxProvider,
    SandboxState, SessionCommand, SessionCommandResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://app.daytona.io/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_START_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct CreateSandboxBody<'a> {
    env: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SandboxDto {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

impl From<SandboxDto> for SandboxHandle {
    fn from(dto: SandboxDto) -> Self {
        let state = dto
            .state
            .as_deref()
            .map(SandboxState::from)
            .unwrap_or_else(|| SandboxState::Other("unknown".to_string()));
        SandboxHandle::new(dto.id, state)
    }
}

/// Daytona provider for remote sandboxes
pub struct DaytonaProvider {
    client: Client,
    api_key: String,
    api_url: String,
    start_poll_interval: Duration,
}

impl DaytonaProvider {
    /// Create a new Daytona provider
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let api_url = api_url.into();

        if api_key.is_empty() || api_url.is_empty() {
            return Err(ProviderError::ConfigError(
                "Daytona API key and API URL are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            start_poll_interval: DEFAULT_START_POLL_INTERVAL,
        })
    }

    /// Override how often `start` re-reads the sandbox state
    pub fn with_start_poll_interval(mut self, interval: Duration) -> Self {
        self.start_poll_interval = interval;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn sandbox_url(&self, sandbox_id: &str) -> String {
        format!("{}/sandbox/{}", self.api_url, sandbox_id)
    }

    fn toolbox_url(&self, sandbox_id: &str, path: &str) -> String {
        format!("{}/toolbox/{}/toolbox{}", self.api_url, sandbox_id, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());

        if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(message))
        } else {
            Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn wait_until_started(&self, sandbox_id: &str) -> Result<()> {
        loop {
            let handle: SandboxHandle = self
                .send_json::<SandboxDto>(self.client.get(self.sandbox_url(sandbox_id)))
                .await?
                .into();

            match handle.state {
                SandboxState::Started => return Ok(()),
                SandboxState::Error => {
                    return Err(ProviderError::ApiError {
                        status: 500,
                        message: format!("Sandbox {} entered error state", sandbox_id),
                    })
                }
                ref state => {
                    debug!("Sandbox {} is {}, waiting", sandbox_id, state);
                    tokio::time::sleep(self.start_poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl SandboxProvider for DaytonaProvider {
    async fn create(&self, env_vars: &HashMap<String, String>) -> Result<SandboxHandle> {
        let url = format!("{}/sandbox", self.api_url);
        let dto: SandboxDto = self
            .send_json(
                self.client
                    .post(url)
                    .json(&CreateSandboxBody { env: env_vars }),
            )
            .await?;

        info!("Daytona sandbox {} created", dto.id);
        Ok(dto.into())
    }

    async fn get(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let dto: SandboxDto = self
            .send_json(self.client.get(self.sandbox_url(sandbox_id)))
            .await?;
        Ok(dto.into())
    }

    async fn start(&self, handle: &SandboxHandle, timeout: Duration) -> Result<()> {
        let url = format!("{}/start", self.sandbox_url(&handle.id));

        tokio::time::timeout(timeout, async {
            self.send(self.client.post(url)).await?;
            self.wait_until_started(&handle.id).await
        })
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<()> {
        let url = format!("{}/stop", self.sandbox_url(&handle.id));
        self.send(self.client.post(url)).await?;
        info!("Daytona sandbox {} stopped", handle.id);
        Ok(())
    }

    async fn upload_file(
        &self,
        handle: &SandboxHandle,
        content: Bytes,
        path: &str,
    ) -> Result<()> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let part = multipart::Part::stream(content).file_name(file_name);
        let form = multipart::Form::new().part("file", part);

        self.send(
            self.client
                .post(self.toolbox_url(&handle.id, "/files/upload"))
                .query(&[("path", path)])
                .multipart(form),
        )
        .await?;

        debug!("Uploaded {} to sandbox {}", path, handle.id);
        Ok(())
    }

    async fn execute_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
    ) -> Result<CommandResponse> {
        self.send_json(
            self.client
                .post(self.toolbox_url(&handle.id, "/process/execute"))
                .json(&json!({ "command": command })),
        )
        .await
    }

    async fn create_session(&self, handle: &SandboxHandle, session_id: &str) -> Result<()> {
        self.send(
            self.client
                .post(self.toolbox_url(&handle.id, "/process/session"))
                .json(&json!({ "sessionId": session_id })),
        )
        .await?;
        Ok(())
    }

    async fn execute_session_command(
        &self,
        handle: &SandboxHandle,
        session_id: &str,
        command: &SessionCommand,
    ) -> Result<SessionCommandResponse> {
        let path = format!("/process/session/{}/exec", session_id);
        self.send_json(
            self.client
                .post(self.toolbox_url(&handle.id, &path))
                .json(command),
        )
        .await
    }

    async fn get_preview_link(&self, handle: &SandboxHandle, port: u16) -> Result<PreviewLink> {
        let url = format!("{}/ports/{}/preview-url", self.sandbox_url(&handle.id), port);
        self.send_json(self.client.get(url)).await
    }
}
