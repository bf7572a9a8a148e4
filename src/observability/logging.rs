//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` takes precedence; otherwise the configured `LOG_LEVEL` applies to
//! this crate only, keeping kube and hyper quiet.

use crate::config::{LogConfig, LogFormat};
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Default filter directive for a log level, scoped to this crate
#[must_use]
pub fn default_directive(level: &str) -> String {
    format!("sealedsecret_git={}", level.to_lowercase())
}

/// Initialize the global tracing subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    // Logs go to stderr so that command output on stdout stays machine readable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    result.map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
