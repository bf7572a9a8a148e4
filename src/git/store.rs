//! Working-copy owner backed by command-line git.

use super::credentials::{authenticated_url, Redactor};
use super::{validate_path, ArtifactStore, StoreError};
use crate::config::GitConfig;
use crate::constants::{COMMIT_MESSAGE_PREFIX, GIT_REMOTE};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

/// Commit verb recorded in the message template
#[derive(Debug, Clone, Copy)]
enum Change {
    Created,
    Deleted,
}

impl Change {
    fn message(self, path: &str) -> String {
        let verb = match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
        };
        format!("{COMMIT_MESSAGE_PREFIX} {verb} --> {path}")
    }
}

/// One cloned working copy of the remote repository
///
/// The clone lives in a temporary directory that is removed on drop. All
/// mutations hold `write_lock` from the first filesystem write until the
/// post-push fetch returns.
pub struct GitStore {
    git: PathBuf,
    // Keeps the clone alive for the lifetime of the store
    _workdir: TempDir,
    repo: PathBuf,
    remote: String,
    author_name: String,
    author_email: String,
    redactor: Redactor,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("repo", &self.repo)
            .field("remote", &self.redactor.redact(&self.remote))
            .finish_non_exhaustive()
    }
}

impl GitStore {
    /// Clone the configured remote into a fresh temporary directory
    ///
    /// # Errors
    ///
    /// Fails when git is not installed, the temporary directory cannot be
    /// created, or the clone itself fails.
    pub async fn clone(config: &GitConfig) -> Result<Self, StoreError> {
        let Ok(git) = which::which("git") else {
            return Err(StoreError::GitNotInstalled);
        };
        let workdir = tempfile::Builder::new()
            .prefix("sealedsecret-git-")
            .tempdir()
            .map_err(|source| StoreError::Io {
                op: "create working directory for",
                path: config.url.clone(),
                source,
            })?;
        let repo = workdir.path().join("repo");
        let remote = authenticated_url(config);
        let redactor = Redactor::for_config(config);

        let span = info_span!("git.clone", url = %config.url);
        async {
            let start = Instant::now();
            let output = tokio::process::Command::new(&git)
                .arg("clone")
                .arg("--quiet")
                .arg("--origin")
                .arg(GIT_REMOTE)
                .arg(&remote)
                .arg(&repo)
                .env("GIT_TERMINAL_PROMPT", "0")
                .output()
                .await
                .map_err(|source| StoreError::Io {
                    op: "run git clone for",
                    path: config.url.clone(),
                    source,
                })?;

            if !output.status.success() {
                return Err(StoreError::Clone {
                    url: config.url.clone(),
                    stderr: redactor.redact(&String::from_utf8_lossy(&output.stderr)),
                });
            }

            info!(
                "Cloned {} in {:.2}s",
                config.url,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        .instrument(span)
        .await?;

        Ok(Self {
            git,
            _workdir: workdir,
            repo,
            remote,
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
            redactor,
            write_lock: Mutex::new(()),
        })
    }

    async fn run(&self, args: &[&str]) -> Result<Output, StoreError> {
        let command = subcommand(args);
        debug!("git {}", args.join(" "));
        tokio::process::Command::new(&self.git)
            .args(args)
            .current_dir(&self.repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|source| StoreError::Io {
                op: "run git",
                path: command,
                source,
            })
    }

    /// Run a git command and fail on a non-zero exit
    async fn git(&self, args: &[&str]) -> Result<Output, StoreError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(StoreError::Command {
                command: subcommand(args),
                stderr: self.redactor.redact(&String::from_utf8_lossy(&output.stderr)),
            })
        }
    }

    /// Whether the index differs from HEAD
    async fn has_staged_changes(&self) -> Result<bool, StoreError> {
        let output = self.run(&["diff", "--cached", "--quiet"]).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(StoreError::Command {
                command: "diff".to_string(),
                stderr: self.redactor.redact(&String::from_utf8_lossy(&output.stderr)),
            }),
        }
    }

    async fn commit(&self, message: &str) -> Result<(), StoreError> {
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git(&[
            "-c",
            &name,
            "-c",
            &email,
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "-m",
            message,
        ])
        .await
        .map(|_| ())
    }

    async fn push_head(&self, path: &str) -> Result<(), StoreError> {
        let output = self.run(&["push", "--porcelain", GIT_REMOTE, "HEAD"]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = self.redactor.redact(&format!("{stdout}\n{stderr}"));
        if is_rejection(&combined) {
            warn!("Push of {} rejected by remote", path);
            Err(StoreError::PushRejected {
                path: path.to_string(),
                reason: combined,
            })
        } else {
            Err(StoreError::Command {
                command: "push".to_string(),
                stderr: combined,
            })
        }
    }

    async fn fetch(&self) -> Result<(), StoreError> {
        self.git(&["fetch", "--quiet", GIT_REMOTE]).await.map(|_| ())
    }

    /// Number of local commits the remote has not accepted yet
    ///
    /// Non-zero after a push was rejected or failed midway.
    async fn unpublished_commits(&self) -> Result<u64, StoreError> {
        let remotes = format!("--remotes={GIT_REMOTE}");
        let output = self
            .git(&["rev-list", "--count", "HEAD", "--not", &remotes])
            .await?;
        let count = String::from_utf8_lossy(&output.stdout);
        count.trim().parse().map_err(|e| StoreError::Command {
            command: "rev-list".to_string(),
            stderr: format!("unexpected commit count {:?}: {e}", count.trim()),
        })
    }

    /// Commit whatever is staged, push and refresh remote refs
    ///
    /// An empty index skips the commit. Commits left over from an earlier
    /// failed push are pushed along with the new one.
    async fn publish(&self, change: Change, path: &str) -> Result<(), StoreError> {
        if self.has_staged_changes().await? {
            self.commit(&change.message(path)).await?;
        } else {
            debug!("Nothing staged for {}, skipping commit", path);
        }
        self.push_pending(path).await?;
        self.fetch().await
    }

    async fn push_pending(&self, path: &str) -> Result<(), StoreError> {
        match self.unpublished_commits().await? {
            0 => Ok(()),
            pending => {
                debug!("Pushing {} unpublished commit(s) for {}", pending, path);
                self.push_head(path).await
            }
        }
    }
}

/// First argument that is not part of a leading `-c key=value` pair
fn subcommand(args: &[&str]) -> String {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
        } else {
            return (*arg).to_string();
        }
    }
    String::new()
}

fn is_rejection(output: &str) -> bool {
    ["[rejected]", "[remote rejected]", "non-fast-forward", "fetch first"]
        .iter()
        .any(|marker| output.contains(marker))
}

#[async_trait]
impl ArtifactStore for GitStore {
    async fn push(&self, content: &[u8], path: &str) -> Result<(), StoreError> {
        let relative = validate_path(path)?;
        let full = self.repo.join(&relative);
        let span = info_span!("git.push", path = %path, bytes = content.len());

        async {
            let _guard = self.write_lock.lock().await;
            let start = Instant::now();

            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| StoreError::Io {
                        op: "create directory for",
                        path: path.to_string(),
                        source,
                    })?;
            }
            tokio::fs::write(&full, content)
                .await
                .map_err(|source| StoreError::Io {
                    op: "write",
                    path: path.to_string(),
                    source,
                })?;

            let relative = relative.to_string_lossy();
            self.git(&["add", "--", &relative]).await?;
            self.publish(Change::Created, path).await?;

            info!(
                "Pushed {} in {:.2}s",
                path,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn get_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.repo.join(validate_path(path)?);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(StoreError::Io {
                op: "read",
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<(), StoreError> {
        let relative = validate_path(path)?;
        let full = self.repo.join(&relative);
        let span = info_span!("git.delete", path = %path);

        async {
            let _guard = self.write_lock.lock().await;
            let start = Instant::now();

            let exists = tokio::fs::try_exists(&full)
                .await
                .map_err(|source| StoreError::Io {
                    op: "stat",
                    path: path.to_string(),
                    source,
                })?;
            if !exists {
                // An earlier delete may have committed locally but never reached the remote
                self.push_pending(path).await?;
                return Err(StoreError::NotFound {
                    path: path.to_string(),
                });
            }

            let relative = relative.to_string_lossy();
            self.git(&["rm", "--quiet", "--", &relative]).await?;
            self.publish(Change::Deleted, path).await?;

            info!(
                "Deleted {} in {:.2}s",
                path,
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        .instrument(span)
        .await
    }
}
