// ABOUTME: sandrelay command-line entry point
// ABOUTME: Serves the HTTP API, builds worker bundles and runs one-shot or streamed exchanges

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use sandrelay_cli::bundles::resolve_artifact;
use sandrelay_cli::{run_server, AppState, ServerConfig};
use sandrelay_sandbox::bundle::{DEMO_TARGET, STREAM_TARGET};
use sandrelay_sandbox::{
    ArtifactCache, BundleBuilder, BundleTarget, ExecutionRequest, SandboxConfig, SandboxService,
    WorkerEventDecoder,
};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sandrelay")]
#[command(about = "sandrelay - run worker programs in remote sandboxes and relay their output")]
#[command(version)]
struct Cli {
    /// Directory holding worker/ sources and the dist/ output
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long, help = "Override the PORT environment variable")]
        port: Option<u16>,
    },
    /// Bundle a worker program with esbuild
    Bundle {
        /// Target to build (demo or stream)
        target: String,
    },
    /// Run a one-shot worker in a throwaway sandbox
    Run {
        #[arg(default_value = DEMO_TARGET)]
        artifact: String,
    },
    /// Send a message to the streaming worker and print what it streams back
    Stream {
        message: String,
        /// Reuse a sandbox returned by an earlier call
        #[arg(long)]
        sandbox_id: Option<String>,
        /// Print the worker's NDJSON records untouched
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(cli: Cli) -> Result<()> {
    let server_config = ServerConfig::from_env()?;

    match cli.command {
        Commands::Serve { port } => {
            let mut server_config = server_config;
            if let Some(port) = port {
                server_config.port = port;
            }
            let service = build_service(&cli.root, &server_config).await?;
            run_server(&server_config, AppState::new(service)).await
        }
        Commands::Bundle { target } => bundle_command(&cli.root, &server_config, &target).await,
        Commands::Run { artifact } => {
            let service = build_service(&cli.root, &server_config).await?;
            let output = service.run_once(&artifact).await?;
            print!("{}", output.result);
            eprintln!("{} {} exited {}", "✅".green(), artifact, output.exit_code);
            Ok(())
        }
        Commands::Stream {
            message,
            sandbox_id,
            raw,
        } => {
            let service = build_service(&cli.root, &server_config).await?;
            stream_command(&service, message, sandbox_id, raw).await
        }
    }
}

fn bundle_builder(server_config: &ServerConfig) -> BundleBuilder {
    BundleBuilder::with_command(server_config.esbuild_path.clone(), Vec::<String>::new())
}

async fn build_service(root: &Path, server_config: &ServerConfig) -> Result<SandboxService> {
    let config = SandboxConfig::from_env().context("Failed to load sandbox configuration")?;
    let cache = Arc::new(ArtifactCache::new(bundle_builder(server_config)));

    let stream = resolve_artifact(
        &cache,
        STREAM_TARGET,
        config.stream_bundle_path.as_deref(),
        root,
    )
    .await?;
    let demo = resolve_artifact(
        &cache,
        DEMO_TARGET,
        config.oneshot_bundle_path.as_deref(),
        root,
    )
    .await?;

    let mut service = SandboxService::from_config(&config, stream)
        .context("Failed to create sandbox provider")?
        .with_oneshot_artifact(demo);

    // Worker sources edited while serving are rebuilt and redeployed on the next request
    if config.stream_bundle_path.is_none() {
        service = service.with_stream_rebuild(cache, BundleTarget::stream(root));
    }
    Ok(service)
}

async fn bundle_command(root: &Path, server_config: &ServerConfig, name: &str) -> Result<()> {
    let target = BundleTarget::by_name(root, name)
        .ok_or_else(|| anyhow!("Unknown bundle target: {} (expected demo or stream)", name))?;

    let artifact = bundle_builder(server_config).build(&target).await?;

    println!(
        "{} Built {} → {} ({} bytes, source {})",
        "✅".green(),
        artifact.name.bold(),
        target.out.display(),
        artifact.bytes.len(),
        &artifact.source_digest[..12]
    );
    Ok(())
}

async fn stream_command(
    service: &SandboxService,
    message: String,
    sandbox_id: Option<String>,
    raw: bool,
) -> Result<()> {
    let request = ExecutionRequest {
        messages: vec![json!({"role": "user", "content": message})],
        sandbox_id,
    };

    let session = service.run_stream(request).await?;
    eprintln!("{} {}", "Sandbox:".cyan(), session.sandbox_id);

    let mut stream = session.stream;
    let mut decoder = WorkerEventDecoder::new();
    let mut stdout = std::io::stdout();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if raw {
            stdout.write_all(&chunk)?;
        } else {
            for event in decoder.push(&chunk) {
                print_event(&mut stdout, event?)?;
            }
        }
        stdout.flush()?;
    }

    if let Some(event) = decoder.finish() {
        print_event(&mut stdout, event?)?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn print_event(out: &mut impl Write, event: sandrelay_sandbox::WorkerEvent) -> Result<()> {
    let chunk = event.chunk();
    if let Some(text) = chunk.get("text").and_then(|text| text.as_str()) {
        write!(out, "{}", text)?;
    }
    Ok(())
}
