// ABOUTME: Resolves the worker bundles the server deploys, prebuilt or built on demand
// ABOUTME: Prebuilt paths from configuration win over building from the worker sources

use anyhow::{anyhow, Context, Result};
use sandrelay_sandbox::bundle::{ArtifactCache, BundleTarget, DeploymentArtifact};
use std::path::Path;
use std::sync::Arc;

/// Load `name` from `prebuilt` when given, otherwise bundle it from `root`
pub async fn resolve_artifact(
    cache: &ArtifactCache,
    name: &str,
    prebuilt: Option<&Path>,
    root: &Path,
) -> Result<Arc<DeploymentArtifact>> {
    if let Some(path) = prebuilt {
        return cache
            .load_prebuilt(name, path)
            .await
            .with_context(|| format!("Failed to load prebuilt {} bundle", name));
    }

    let target = BundleTarget::by_name(root, name)
        .ok_or_else(|| anyhow!("Unknown bundle target: {}", name))?;

    cache
        .build_if_changed(&target)
        .await
        .with_context(|| format!("Failed to build {} bundle", name))
}
