// ABOUTME: Builds worker bundles with esbuild and caches them as deployable artifacts
// ABOUTME: Rebuilds only when the entry source digest changes; artifacts are shared read-only

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lets CommonJS dependencies call `require` from inside an ESM bundle
pub const REQUIRE_SHIM: &str =
    "import { createRequire } from 'module'; const require = createRequire(import.meta.url);";

pub const DEMO_TARGET: &str = "demo";
pub const STREAM_TARGET: &str = "stream";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Bundle entry not found: {}", .0.display())]
    EntryNotFound(PathBuf),

    #[error("Bundler exited with status {status:?}: {stderr}")]
    BuilderFailed { status: Option<i32>, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BundleError>;

/// A worker entry point and where its bundle is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleTarget {
    pub name: String,
    pub entry: PathBuf,
    pub out: PathBuf,
}

impl BundleTarget {
    pub fn new(name: impl Into<String>, entry: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            out: out.into(),
        }
    }

    /// One-shot worker
    pub fn demo(root: &Path) -> Self {
        Self::new(
            DEMO_TARGET,
            root.join("worker").join("coderun.ts"),
            root.join("dist").join("coderun.mjs"),
        )
    }

    /// Streaming worker serving /health and /stream
    pub fn stream(root: &Path) -> Self {
        Self::new(
            STREAM_TARGET,
            root.join("worker").join("coderunStream.ts"),
            root.join("dist").join("coderunStream.mjs"),
        )
    }

    pub fn by_name(root: &Path, name: &str) -> Option<Self> {
        match name {
            DEMO_TARGET => Some(Self::demo(root)),
            STREAM_TARGET => Some(Self::stream(root)),
            _ => None,
        }
    }
}

/// Immutable bundled worker program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentArtifact {
    pub name: String,
    pub bytes: Bytes,
    /// SHA-256 of the source the bundle was built from
    pub source_digest: String,
}

impl DeploymentArtifact {
    /// Wrap already-bundled bytes, digesting the bytes themselves
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            source_digest: digest(&bytes),
            bytes,
        }
    }
}

pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

async fn read_entry(entry: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(entry).await {
        Ok(source) => Ok(source),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BundleError::EntryNotFound(entry.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs esbuild (or a compatible command) to produce single-file ESM bundles
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    program: OsString,
    leading_args: Vec<OsString>,
    banner: String,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::with_command("esbuild", Vec::<OsString>::new())
    }

    /// Use `program` with `leading_args` placed before the entry path
    pub fn with_command<P, A>(program: P, leading_args: impl IntoIterator<Item = A>) -> Self
    where
        P: Into<OsString>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            banner: REQUIRE_SHIM.to_string(),
        }
    }

    fn args(&self, target: &BundleTarget) -> Vec<OsString> {
        let mut args = self.leading_args.clone();
        args.push(target.entry.clone().into_os_string());
        args.push("--bundle".into());
        args.push("--platform=node".into());
        args.push("--format=esm".into());
        args.push(format!("--banner:js={}", self.banner).into());

        let mut outfile = OsString::from("--outfile=");
        outfile.push(&target.out);
        args.push(outfile);
        args
    }

    pub async fn build(&self, target: &BundleTarget) -> Result<DeploymentArtifact> {
        let source = read_entry(&target.entry).await?;

        if let Some(parent) = target.out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            "Bundling {} from {}",
            target.name,
            target.entry.display()
        );

        let output = Command::new(&self.program)
            .args(self.args(target))
            .output()
            .await?;

        if !output.status.success() {
            return Err(BundleError::BuilderFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(&target.out).await?;
        debug!("Bundle {} is {} bytes", target.name, bytes.len());

        Ok(DeploymentArtifact {
            name: target.name.clone(),
            bytes: Bytes::from(bytes),
            source_digest: digest(&source),
        })
    }
}

/// Latest artifact per target name
pub struct ArtifactCache {
    builder: BundleBuilder,
    artifacts: RwLock<HashMap<String, Arc<DeploymentArtifact>>>,
}

impl ArtifactCache {
    pub fn new(builder: BundleBuilder) -> Self {
        Self {
            builder,
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    /// Build `target` unless the cached artifact came from identical source
    pub async fn build_if_changed(&self, target: &BundleTarget) -> Result<Arc<DeploymentArtifact>> {
        let source = read_entry(&target.entry).await?;
        let current = digest(&source);

        if let Some(cached) = self.get(&target.name).await {
            if cached.source_digest == current {
                debug!("Bundle {} unchanged, reusing cached artifact", target.name);
                return Ok(cached);
            }
        }

        let artifact = Arc::new(self.builder.build(target).await?);
        self.artifacts
            .write()
            .await
            .insert(target.name.clone(), artifact.clone());
        Ok(artifact)
    }

    /// Register an already-built bundle read from disk
    pub async fn load_prebuilt(&self, name: &str, path: &Path) -> Result<Arc<DeploymentArtifact>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BundleError::EntryNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        info!("Loaded prebuilt bundle {} from {}", name, path.display());
        Ok(self.insert(DeploymentArtifact::from_bytes(name, bytes)).await)
    }

    pub async fn insert(&self, artifact: DeploymentArtifact) -> Arc<DeploymentArtifact> {
        let artifact = Arc::new(artifact);
        self.artifacts
            .write()
            .await
            .insert(artifact.name.clone(), artifact.clone());
        artifact
    }

    pub async fn get(&self, name: &str) -> Option<Arc<DeploymentArtifact>> {
        self.artifacts.read().await.get(name).cloned()
    }
}
