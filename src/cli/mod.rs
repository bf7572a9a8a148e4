//! # sealedsecret-git CLI
//!
//! Hosts the declarative adapter: seal secrets against the in-cluster sealed
//! secrets controller and keep the sealed artifacts in a git repository.
//!
//! ## Usage
//!
//! ```bash
//! # Create or update the artifact declared in db.yaml, recording state
//! sealedsecret-git apply -f db.yaml --state db.state.json
//!
//! # Re-derive state (drops it when the file is gone or the controller key rotated)
//! sealedsecret-git refresh --state db.state.json
//!
//! # Delete the artifact from the repository
//! sealedsecret-git destroy --state db.state.json
//!
//! # Seal a Secret manifest to stdout without touching git
//! sealedsecret-git seal -f secret.yaml
//!
//! # Print the controller public key hash
//! sealedsecret-git fetch-cert
//! ```
//!
//! Configuration comes from the environment (`GIT_URL`, `GIT_USERNAME`,
//! `GIT_TOKEN`, `CONTROLLER_NAME`, `CONTROLLER_NAMESPACE`, ...).

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use kube::config::KubeConfigOptions;
use kube::Client;
use sealedsecret_git::config::ProviderConfig;
use sealedsecret_git::controller::reconciler::Reconciler;
use sealedsecret_git::controller::retry::RetryPolicy;
use sealedsecret_git::git::GitStore;
use sealedsecret_git::kubeseal::{
    ClusterError, KubeServiceProxy, KubesealSealer, PublicKey, PublicKeyResolver,
    PublicKeySource, ResolveError,
};
use sealedsecret_git::observability::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod apply;
mod destroy;
mod fetch_cert;
mod refresh;
mod seal;

/// Seal Kubernetes Secrets into a git repository
#[derive(Parser)]
#[command(name = "sealedsecret-git", version)]
#[command(
    about = "Seal Kubernetes Secrets and commit them to a git repository",
    long_about = None,
    after_help = "\
Examples:
  sealedsecret-git apply -f db.yaml --state db.state.json
  sealedsecret-git refresh --state db.state.json
  sealedsecret-git seal -f secret.yaml > sealed.yaml
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes context to use (overrides KUBE_CONTEXT)
    #[arg(short, long, global = true)]
    context: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the sealed artifact for a declaration
    Apply {
        /// YAML declaration (name, namespace, type, data, filepath)
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// State file written on success
        #[arg(short, long, value_name = "FILE")]
        state: PathBuf,
    },
    /// Re-derive state from the repository and the controller key
    Refresh {
        #[arg(short, long, value_name = "FILE")]
        state: PathBuf,
    },
    /// Delete the sealed artifact and its state
    Destroy {
        #[arg(short, long, value_name = "FILE")]
        state: PathBuf,
    },
    /// Seal a Secret manifest and print the SealedSecret to stdout
    Seal {
        /// Secret manifest (YAML)
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the controller's public key hash
    #[command(name = "fetch-cert")]
    FetchCert {
        /// Print the certificate PEM instead of the hash
        #[arg(long)]
        pem: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required for rustls 0.23+ before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    let cli = Cli::parse();

    let config = ProviderConfig::from_env().context("Invalid configuration")?;
    init_logging(&config.log)?;

    debug!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let context = cli.context.or_else(|| config.kube_context.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Apply { file, state } => {
            let reconciler = git_reconciler(&config, context).await?;
            apply::apply_command(&reconciler, &file, &state, &cancel).await
        }
        Commands::Refresh { state } => {
            let reconciler = git_reconciler(&config, context).await?;
            refresh::refresh_command(&reconciler, &state, &cancel).await
        }
        Commands::Destroy { state } => {
            let reconciler = git_reconciler(&config, context).await?;
            destroy::destroy_command(&reconciler, &state).await
        }
        Commands::Seal { file } => {
            let client = kube_client(context).await?;
            seal::seal_command(&key_resolver(&config, client), &file, &cancel).await
        }
        Commands::FetchCert { pem } => {
            let client = kube_client(context).await?;
            fetch_cert::fetch_cert_command(&key_resolver(&config, client), pem, &cancel).await
        }
    }
}

async fn kube_client(context: Option<String>) -> Result<Client> {
    match context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.clone()),
                ..KubeConfigOptions::default()
            };
            let kube_config = kube::Config::from_kubeconfig(&options)
                .await
                .with_context(|| format!("Failed to load kubeconfig context {context}"))?;
            Client::try_from(kube_config).context("Failed to create Kubernetes client")
        }
        None => Client::try_default()
            .await
            .context("Failed to create Kubernetes client. Ensure kubeconfig is configured."),
    }
}

fn key_resolver(config: &ProviderConfig, client: Client) -> PublicKeyResolver {
    PublicKeyResolver::new(
        Arc::new(KubeServiceProxy::new(client)),
        config.controller.name.clone(),
        config.controller.namespace.clone(),
        RetryPolicy::from(&config.key_fetch),
    )
}

/// Controller key source that connects to the cluster on first use
///
/// `destroy` never resolves a key, so it runs without any kubeconfig.
struct ClusterKeys {
    config: ProviderConfig,
    context: Option<String>,
    resolver: OnceCell<PublicKeyResolver>,
}

impl ClusterKeys {
    fn new(config: &ProviderConfig, context: Option<String>) -> Self {
        Self {
            config: config.clone(),
            context,
            resolver: OnceCell::new(),
        }
    }
}

#[async_trait]
impl PublicKeySource for ClusterKeys {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<PublicKey, ResolveError> {
        let resolver = self
            .resolver
            .get_or_try_init(|| async {
                let client = kube_client(self.context.clone()).await.map_err(|e| {
                    ResolveError::Cluster(ClusterError::Request {
                        target: "kube-apiserver".to_string(),
                        message: format!("{e:#}"),
                    })
                })?;
                Ok::<_, ResolveError>(key_resolver(&self.config, client))
            })
            .await?;
        resolver.resolve(cancel).await
    }
}

async fn git_reconciler(config: &ProviderConfig, context: Option<String>) -> Result<Reconciler> {
    let git = config.git().context("Git-backed commands need GIT_URL")?;
    let store = GitStore::clone(git)
        .await
        .context("Failed to prepare repository working copy")?;
    Ok(Reconciler::new(
        Arc::new(ClusterKeys::new(config, context)),
        Arc::new(KubesealSealer),
        Arc::new(store),
    ))
}
