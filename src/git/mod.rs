//! # Git-Backed Artifact Store
//!
//! Sealed artifacts are persisted as files in a remote git repository.
//!
//! - [`ArtifactStore`] is the seam the reconciler talks to
//! - [`GitStore`] owns one cloned working copy and serializes every
//!   write-commit-push-fetch sequence behind a single lock
//! - Reads go straight to the working copy without taking the lock

pub mod credentials;
mod store;

pub use credentials::authenticated_url;
pub use store::GitStore;

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors raised by the artifact store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path is empty, absolute, escapes the working copy or touches `.git`
    #[error("invalid repository path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// File does not exist in the working copy
    #[error("{path} not found in repository working copy")]
    NotFound { path: String },

    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The remote refused the push (non-fast-forward, protected branch, hooks)
    #[error("push of {path} rejected by remote: {reason}")]
    PushRejected { path: String, reason: String },

    #[error("failed to clone {url}: {stderr}")]
    Clone { url: String, stderr: String },

    #[error("git executable not found in PATH")]
    GitNotInstalled,
}

impl StoreError {
    /// Whether the error only signals that the file is absent
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Persistence seam for sealed artifacts, keyed by repository-relative path
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write, commit, push and fetch `content` at `path`
    async fn push(&self, content: &[u8], path: &str) -> Result<(), StoreError>;

    /// Read `path` from the local working copy
    async fn get_file(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove, commit, push and fetch `path`
    async fn delete_file(&self, path: &str) -> Result<(), StoreError>;
}

/// Check a repository-relative path and normalize it to a [`PathBuf`]
///
/// # Errors
///
/// Returns [`StoreError::InvalidPath`] for empty or absolute paths, `..`
/// components, and anything inside `.git`.
pub fn validate_path(path: &str) -> Result<PathBuf, StoreError> {
    let invalid = |reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    if path.ends_with('/') {
        return Err(invalid("path names a directory"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                if part == ".git" {
                    return Err(invalid("path must not touch the .git directory"));
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("path must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative to the repository root"))
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path_accepts_nested_relative_paths() {
        assert_eq!(
            validate_path("apps/prod/db.yaml").unwrap(),
            PathBuf::from("apps/prod/db.yaml")
        );
        assert_eq!(
            validate_path("./db.yaml").unwrap(),
            PathBuf::from("db.yaml")
        );
    }

    #[test]
    fn test_validate_path_rejects_escapes() {
        for path in ["", "  ", "/etc/passwd", "../outside.yaml", "a/../../b.yaml", ".git/config", "a/.git/HEAD", "dir/", "."] {
            let err = validate_path(path).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidPath { .. }),
                "{path:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::NotFound { path: "a".into() }.is_not_found());
        assert!(!StoreError::GitNotInstalled.is_not_found());
    }
}
