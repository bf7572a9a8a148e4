//! # Seal Command
//!
//! Seal a Secret manifest and print the resulting SealedSecret, without git.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use sealedsecret_git::controller::reconciler::render;
use sealedsecret_git::kubeseal::{KubesealSealer, PublicKeyResolver};
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn seal_command(
    resolver: &PublicKeyResolver,
    file: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let secret: Secret = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("{} is not a Secret manifest", file.display()))?;

    let sealed = render(resolver, &KubesealSealer, &secret, cancel).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&sealed).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to write to stdout")?;
    Ok(())
}
