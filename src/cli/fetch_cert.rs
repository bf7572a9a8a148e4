//! # Fetch Cert Command

use anyhow::{Context, Result};
use sealedsecret_git::kubeseal::{PublicKey, PublicKeyResolver};
use tokio_util::sync::CancellationToken;

pub async fn fetch_cert_command(
    resolver: &PublicKeyResolver,
    pem: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let certificate = resolver
        .fetch_certificate(cancel)
        .await
        .context("Failed to fetch the controller certificate")?;

    if pem {
        print!("{}", String::from_utf8_lossy(&certificate));
        return Ok(());
    }

    let key = PublicKey::from_certificate_pem(&certificate)
        .context("Controller served an unusable certificate")?;
    println!("{}", key.hash());
    Ok(())
}
