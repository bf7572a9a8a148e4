//! # Refresh Command
//!
//! Re-derive state from the repository. A missing file or a rotated controller
//! key drops the state so the next apply recreates the artifact.

use anyhow::{Context, Result};
use sealedsecret_git::controller::reconciler::Reconciler;
use sealedsecret_git::resource::{self, ResourceState};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn refresh_command(
    reconciler: &Reconciler,
    state_file: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(state) = ResourceState::load(state_file).await? else {
        println!("no state recorded in {}", state_file.display());
        return Ok(());
    };

    match resource::refresh(reconciler, &state, cancel)
        .await
        .with_context(|| format!("Failed to refresh {}", state.filepath))?
    {
        Some(current) => {
            current.save(state_file).await?;
            println!(
                "present {}/{} at {} (type {}, public key {})",
                current.namespace,
                current.name,
                current.filepath,
                current.secret_type,
                current.public_key_hash
            );
        }
        None => {
            ResourceState::remove(state_file).await?;
            println!("absent {}; run apply to recreate it", state.filepath);
        }
    }
    Ok(())
}
