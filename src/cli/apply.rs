//! # Apply Command
//!
//! Create or update the sealed artifact for a declaration and record its state.

use anyhow::{Context, Result};
use sealedsecret_git::controller::reconciler::Reconciler;
use sealedsecret_git::resource::{self, ResourceState, SealedSecretInGit};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn apply_command(
    reconciler: &Reconciler,
    file: &Path,
    state_file: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let declared = SealedSecretInGit::from_yaml(&bytes)
        .with_context(|| format!("Invalid declaration in {}", file.display()))?;

    let prior = ResourceState::load(state_file).await?;
    let state = resource::apply(reconciler, &declared, prior.as_ref(), cancel)
        .await
        .with_context(|| format!("Failed to apply {}", declared.filepath))?;
    state.save(state_file).await?;

    println!(
        "{} {}/{} -> {} (public key {})",
        if prior.is_some() { "updated" } else { "created" },
        state.namespace,
        state.name,
        state.filepath,
        state.public_key_hash
    );
    Ok(())
}
