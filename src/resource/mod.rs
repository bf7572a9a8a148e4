//! # Declarative Resource Adapter
//!
//! Translates a declared `SealedSecretInGit` and its persisted state into
//! reconciler calls, the way an infrastructure-as-code host drives a provider:
//!
//! - `apply`: create when there is no prior state, update otherwise
//! - `refresh`: re-derive state, dropping it when the artifact must be recreated
//! - `destroy`: delete the artifact and forget the state

use crate::constants::DEFAULT_SECRET_TYPE;
use crate::controller::reconciler::{
    ReadOutcome, ReconcileError, Reconciler, SecretDeclaration, TrackedResource,
};
use crate::kubeseal::PublicKeyHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode declaration: {0}")]
    Declaration(#[from] serde_yaml::Error),
}

fn default_type() -> String {
    DEFAULT_SECRET_TYPE.to_string()
}

/// User-facing declaration of a secret sealed into the repository
#[derive(Clone, Deserialize, Serialize)]
pub struct SealedSecretInGit {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type", default = "default_type")]
    pub secret_type: String,
    /// Plaintext values; sensitive
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Repository-relative path of the sealed artifact
    pub filepath: String,
}

impl std::fmt::Debug for SealedSecretInGit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecretInGit")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("type", &self.secret_type)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("filepath", &self.filepath)
            .finish()
    }
}

impl SealedSecretInGit {
    /// Parse a YAML declaration
    ///
    /// # Errors
    ///
    /// [`StateError::Declaration`] when the document does not match the schema.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    #[must_use]
    pub fn to_declaration(&self) -> SecretDeclaration {
        SecretDeclaration {
            path: self.filepath.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            secret_type: Some(self.secret_type.clone()),
            data: self
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                .collect(),
        }
    }
}

/// Persisted view of a tracked resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Same as `filepath`
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    pub filepath: String,
    pub public_key_hash: PublicKeyHash,
    pub updated_at: DateTime<Utc>,
}

impl From<TrackedResource> for ResourceState {
    fn from(resource: TrackedResource) -> Self {
        Self {
            id: resource.path.clone(),
            name: resource.name,
            namespace: resource.namespace,
            secret_type: resource.secret_type,
            filepath: resource.path,
            public_key_hash: resource.public_key_hash,
            updated_at: Utc::now(),
        }
    }
}

impl ResourceState {
    /// Load state from a JSON file; a missing file means no prior state
    ///
    /// # Errors
    ///
    /// I/O failures other than absence, or malformed JSON.
    pub async fn load(path: &Path) -> Result<Option<Self>, StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    op: "read",
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StateError::Json {
                path: path.display().to_string(),
                source,
            })
    }

    /// Write state as pretty JSON
    ///
    /// # Errors
    ///
    /// I/O failures.
    pub async fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| StateError::Json {
            path: path.display().to_string(),
            source,
        })?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| StateError::Io {
                op: "write",
                path: path.display().to_string(),
                source,
            })
    }

    /// Remove the state file; already gone is fine
    ///
    /// # Errors
    ///
    /// I/O failures other than absence.
    pub async fn remove(path: &Path) -> Result<(), StateError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                op: "remove",
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

/// Create or update the declared artifact
///
/// A changed `filepath` replaces the resource: the new path is written first,
/// then the old one is deleted.
///
/// # Errors
///
/// Any reconciler failure; a failure deleting the old path leaves the new
/// artifact in place.
pub async fn apply(
    reconciler: &Reconciler,
    declared: &SealedSecretInGit,
    prior: Option<&ResourceState>,
    cancel: &CancellationToken,
) -> Result<ResourceState, ReconcileError> {
    let declaration = declared.to_declaration();
    let tracked = match prior {
        Some(state) if state.id == declared.filepath => {
            reconciler.update(declaration, cancel).await?
        }
        Some(state) => {
            info!(
                "Path changed from {} to {}, replacing",
                state.filepath, declared.filepath
            );
            let tracked = reconciler.create(declaration, cancel).await?;
            reconciler.delete(&state.filepath).await?;
            tracked
        }
        None => reconciler.create(declaration, cancel).await?,
    };
    Ok(tracked.into())
}

/// Re-derive state; `None` means the artifact must be recreated
///
/// # Errors
///
/// Any reconciler failure other than absence.
pub async fn refresh(
    reconciler: &Reconciler,
    state: &ResourceState,
    cancel: &CancellationToken,
) -> Result<Option<ResourceState>, ReconcileError> {
    match reconciler
        .read(&state.filepath, Some(&state.public_key_hash), cancel)
        .await?
    {
        ReadOutcome::Present(tracked) => Ok(Some(tracked.into())),
        ReadOutcome::Absent(reason) => {
            warn!("{} must be recreated: {}", state.filepath, reason);
            Ok(None)
        }
    }
}

/// Delete the artifact tracked by `state`
///
/// # Errors
///
/// Any store failure other than the file already being gone.
pub async fn destroy(reconciler: &Reconciler, state: &ResourceState) -> Result<(), ReconcileError> {
    reconciler.delete(&state.filepath).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_defaults_type() {
        let declared = SealedSecretInGit::from_yaml(
            b"name: db\nnamespace: prod\ndata:\n  password: hunter2\nfilepath: apps/db.yaml\n",
        )
        .unwrap();
        assert_eq!(declared.secret_type, "Opaque");

        let declaration = declared.to_declaration();
        assert_eq!(declaration.path, "apps/db.yaml");
        assert_eq!(declaration.data["password"], b"hunter2".to_vec());
    }

    #[test]
    fn test_declaration_requires_filepath() {
        let err = SealedSecretInGit::from_yaml(b"name: db\nnamespace: prod\n").unwrap_err();
        assert!(matches!(err, StateError::Declaration(_)));
    }

    #[test]
    fn test_declaration_debug_hides_values() {
        let declared = SealedSecretInGit::from_yaml(
            b"name: db\nnamespace: prod\ndata:\n  password: hunter2\nfilepath: db.yaml\n",
        )
        .unwrap();
        assert!(!format!("{declared:?}").contains("hunter2"));
    }

    #[test]
    fn test_state_from_tracked_uses_path_as_id() {
        let state = ResourceState::from(TrackedResource {
            path: "apps/db.yaml".into(),
            name: "db".into(),
            namespace: "prod".into(),
            secret_type: "Opaque".into(),
            public_key_hash: PublicKeyHash::new("abc"),
        });
        assert_eq!(state.id, "apps/db.yaml");
        assert_eq!(state.filepath, "apps/db.yaml");
    }

    #[tokio::test]
    async fn test_state_file_round_trip_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        assert_eq!(ResourceState::load(&path).await.unwrap(), None);

        let state = ResourceState::from(TrackedResource {
            path: "db.yaml".into(),
            name: "db".into(),
            namespace: "prod".into(),
            secret_type: "Opaque".into(),
            public_key_hash: PublicKeyHash::new("abc"),
        });
        state.save(&path).await.unwrap();
        assert_eq!(ResourceState::load(&path).await.unwrap(), Some(state));

        ResourceState::remove(&path).await.unwrap();
        ResourceState::remove(&path).await.unwrap();
        assert!(!path.exists());
    }
}
