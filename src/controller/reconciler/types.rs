//! # Types
//!
//! Core types for the reconciler.

use crate::git::{ArtifactStore, StoreError};
use crate::kubeseal::{
    ArtifactError, PublicKeyHash, PublicKeySource, ResolveError, SealError, SecretManifest,
    Sealer,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Entry point that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Render,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Render => "render",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failure should be treated by whoever drives the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Controller not deployed or not ready; the retry budget is already spent
    RetryableTransient,
    /// Malformed credentials, certificate, manifest or path
    FatalConfig,
    /// The remote refused a push
    FatalConflict,
    /// File absent from the working copy
    NotFound,
    Fatal,
}

#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Key(#[from] ResolveError),
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Failure of one reconciler operation against one target
#[derive(Debug, Error)]
#[error("{operation} {target}: {cause}")]
pub struct ReconcileError {
    pub operation: Operation,
    /// Repository path, or `namespace/name` when no path is involved
    pub target: String,
    #[source]
    pub cause: Cause,
}

impl ReconcileError {
    pub fn new(operation: Operation, target: impl Into<String>, cause: impl Into<Cause>) -> Self {
        Self {
            operation,
            target: target.into(),
            cause: cause.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match &self.cause {
            Cause::Key(err) if err.is_transient() => ErrorKind::RetryableTransient,
            Cause::Key(ResolveError::Key(_))
            | Cause::Seal(SealError::EmptyData | SealError::InvalidManifest(_))
            | Cause::Store(StoreError::InvalidPath { .. } | StoreError::Clone { .. }) => {
                ErrorKind::FatalConfig
            }
            Cause::Store(StoreError::PushRejected { .. }) => ErrorKind::FatalConflict,
            Cause::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            Cause::Key(_) | Cause::Seal(_) | Cause::Store(_) | Cause::Artifact(_) => {
                ErrorKind::Fatal
            }
        }
    }
}

/// Plaintext secret to seal and where to put it
#[derive(Clone)]
pub struct SecretDeclaration {
    /// Repository-relative path; also the identity of the tracked resource
    pub path: String,
    pub name: String,
    pub namespace: String,
    /// `Opaque` when unset
    pub secret_type: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl std::fmt::Debug for SecretDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDeclaration")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("secret_type", &self.secret_type)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretDeclaration {
    /// Split into the path and a validated manifest
    ///
    /// # Errors
    ///
    /// See [`SecretManifest::new`].
    pub fn into_parts(self) -> Result<(String, SecretManifest), SealError> {
        let manifest = SecretManifest::new(self.name, self.namespace, self.secret_type, self.data)?;
        Ok((self.path, manifest))
    }
}

/// A sealed secret known to live in the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub path: String,
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    /// Hash of the controller key the artifact was sealed for, or last verified against
    pub public_key_hash: PublicKeyHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    /// No file at the path
    Missing,
    /// The file exists but was sealed for a key the controller no longer serves
    KeyRotated {
        previous: PublicKeyHash,
        current: PublicKeyHash,
    },
}

impl std::fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbsentReason::Missing => f.write_str("file not found in repository"),
            AbsentReason::KeyRotated { previous, current } => write!(
                f,
                "controller public key rotated from {previous} to {current}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Present(TrackedResource),
    /// Must be recreated
    Absent(AbsentReason),
}

/// Composes key resolution, sealing and persistence
///
/// Holds no per-resource state; every pass re-derives state from the repository.
#[derive(Clone)]
pub struct Reconciler {
    pub(super) keys: Arc<dyn PublicKeySource>,
    pub(super) sealer: Arc<dyn Sealer>,
    pub(super) store: Arc<dyn ArtifactStore>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        keys: Arc<dyn PublicKeySource>,
        sealer: Arc<dyn Sealer>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            keys,
            sealer,
            store,
        }
    }
}
