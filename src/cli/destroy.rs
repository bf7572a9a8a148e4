//! # Destroy Command

use anyhow::{Context, Result};
use sealedsecret_git::controller::reconciler::Reconciler;
use sealedsecret_git::resource::{self, ResourceState};
use std::path::Path;

pub async fn destroy_command(reconciler: &Reconciler, state_file: &Path) -> Result<()> {
    let Some(state) = ResourceState::load(state_file).await? else {
        println!("no state recorded in {}", state_file.display());
        return Ok(());
    };

    resource::destroy(reconciler, &state)
        .await
        .with_context(|| format!("Failed to delete {}", state.filepath))?;
    ResourceState::remove(state_file).await?;

    println!("deleted {}", state.filepath);
    Ok(())
}
