// ABOUTME: Shared fixtures for sandbox orchestration integration tests
// ABOUTME: In-memory provider that records calls plus a wiremock worker whose health follows launches

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use sandrelay_sandbox::providers::{
    CommandResponse, PreviewLink, ProviderError, Result, SandboxHandle, SandboxProvider,
    SandboxState, SessionCommand, SessionCommandResponse,
};
use sandrelay_sandbox::{DeploymentArtifact, HealthPolicy, SandboxService, ServiceOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const NDJSON_BODY: &str = concat!(
    "{\"event\":\"data\",\"chunk\":{\"type\":\"text-delta\",\"text\":\"Hel\"}}\n",
    "{\"event\":\"data\",\"chunk\":{\"type\":\"text-delta\",\"text\":\"lo\"}}\n",
    "{\"event\":\"data\",\"chunk\":{\"type\":\"done\",\"messages\":[]}}\n"
);

/// Worker surface: /health is 200 once the provider launched the worker
pub struct Worker {
    pub server: MockServer,
    pub launched: Arc<AtomicBool>,
}

struct LaunchAwareHealth(Arc<AtomicBool>);

impl Respond for LaunchAwareHealth {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.0.load(Ordering::SeqCst) {
            ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#)
        } else {
            ResponseTemplate::new(503)
        }
    }
}

impl Worker {
    pub async fn start(already_running: bool) -> Self {
        let server = MockServer::start().await;
        let launched = Arc::new(AtomicBool::new(already_running));

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(LaunchAwareHealth(launched.clone()))
            .mount(&server)
            .await;

        Self { server, launched }
    }

    pub async fn serve_stream(&self, body: &str, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    pub fn link(&self) -> PreviewLink {
        PreviewLink {
            url: self.server.uri(),
            token: "preview-token".to_string(),
        }
    }
}

/// Provider double that records every call it receives
pub struct FakeProvider {
    link: PreviewLink,
    launched: Arc<AtomicBool>,
    sandboxes: Mutex<HashMap<String, SandboxState>>,
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
    pub fail_create: bool,
    /// Launching flips the worker healthy
    pub launch_makes_healthy: bool,
    pub upload_delay: Duration,
    pub oneshot_response: CommandResponse,
}

impl FakeProvider {
    pub fn new(worker: &Worker) -> Self {
        Self {
            link: worker.link(),
            launched: worker.launched.clone(),
            sandboxes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            fail_create: false,
            launch_makes_healthy: true,
            upload_delay: Duration::ZERO,
            oneshot_response: CommandResponse {
                exit_code: 0,
                result: "ok\n".to_string(),
            },
        }
    }

    pub fn with_sandbox(self, id: &str, state: SandboxState) -> Self {
        self.sandboxes.lock().unwrap().insert(id.to_string(), state);
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn state_of(&self, id: &str) -> Option<SandboxState> {
        self.sandboxes.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(&self, env_vars: &HashMap<String, String>) -> Result<SandboxHandle> {
        let mut names: Vec<&str> = env_vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        self.record(format!("create [{}]", names.join(",")));

        if self.fail_create {
            return Err(ProviderError::ApiError {
                status: 503,
                message: "no capacity".to_string(),
            });
        }

        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("sb-new-{}", next)
        };
        self.sandboxes
            .lock()
            .unwrap()
            .insert(id.clone(), SandboxState::Started);
        Ok(SandboxHandle::new(id, SandboxState::Started))
    }

    async fn get(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        self.record(format!("get {}", sandbox_id));
        self.state_of(sandbox_id)
            .map(|state| SandboxHandle::new(sandbox_id, state))
            .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))
    }

    async fn start(&self, handle: &SandboxHandle, _timeout: Duration) -> Result<()> {
        self.record(format!("start {}", handle.id));
        self.sandboxes
            .lock()
            .unwrap()
            .insert(handle.id.clone(), SandboxState::Started);
        Ok(())
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(format!("stop {}", handle.id));
        self.sandboxes
            .lock()
            .unwrap()
            .insert(handle.id.clone(), SandboxState::Stopped);
        Ok(())
    }

    async fn upload_file(&self, handle: &SandboxHandle, content: Bytes, path: &str) -> Result<()> {
        self.record(format!("upload {} {} ({} bytes)", handle.id, path, content.len()));
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        Ok(())
    }

    async fn execute_command(&self, handle: &SandboxHandle, command: &str) -> Result<CommandResponse> {
        self.record(format!("execute {} {}", handle.id, command));
        if command.starts_with("pkill") {
            return Ok(CommandResponse {
                exit_code: 0,
                result: String::new(),
            });
        }
        Ok(self.oneshot_response.clone())
    }

    async fn create_session(&self, handle: &SandboxHandle, session_id: &str) -> Result<()> {
        self.record(format!("create_session {} {}", handle.id, session_id));
        Ok(())
    }

    async fn execute_session_command(
        &self,
        handle: &SandboxHandle,
        session_id: &str,
        command: &SessionCommand,
    ) -> Result<SessionCommandResponse> {
        self.record(format!(
            "session_exec {} {} {}",
            handle.id, session_id, command.command
        ));
        if self.launch_makes_healthy {
            self.launched.store(true, Ordering::SeqCst);
        }
        Ok(SessionCommandResponse {
            cmd_id: "cmd-1".to_string(),
        })
    }

    async fn get_preview_link(&self, handle: &SandboxHandle, port: u16) -> Result<PreviewLink> {
        self.record(format!("preview {} {}", handle.id, port));
        Ok(self.link.clone())
    }
}

pub fn fast_options() -> ServiceOptions {
    ServiceOptions {
        worker_port: 3213,
        start_timeout: Duration::from_secs(5),
        health: HealthPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
    }
}

pub fn stream_artifact() -> Arc<DeploymentArtifact> {
    Arc::new(DeploymentArtifact::from_bytes("stream", "serve()"))
}

pub fn forwarded_env() -> HashMap<String, String> {
    HashMap::from([
        ("OPENAI_API_KEY".to_string(), "sk-openai".to_string()),
        ("EXA_API_KEY".to_string(), "exa".to_string()),
    ])
}

pub fn service(provider: Arc<FakeProvider>) -> SandboxService {
    SandboxService::new(provider, forwarded_env(), stream_artifact(), fast_options())
}
