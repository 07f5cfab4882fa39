// ABOUTME: sandrelay HTTP surface and shared wiring for the command-line binary
// ABOUTME: Builds the axum router around a SandboxService and serves it

use sandrelay_sandbox::SandboxService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod bundles;
pub mod config;
pub mod error;


pub use config::ServerConfig;
pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SandboxService>,
}

impl AppState {
    pub fn new(service: SandboxService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn create_router(state: AppState) -> axum::Router {
    api::create_router(state).layer(TraceLayer::new_for_http())
}

pub async fn run_server(config: &ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
