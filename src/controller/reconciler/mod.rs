//! # Reconciler
//!
//! Drives one sealed secret through its lifecycle:
//!
//! - **Create / Update**: resolve the controller key, seal, push to the declared path
//! - **Read**: report Present or Absent, treating a rotated controller key as Absent
//! - **Delete**: remove the file; an already-missing file is not an error
//!
//! Nothing is cached between calls. A push that succeeded is never rolled back
//! when a later step fails.

pub mod types;

pub use types::{
    AbsentReason, Cause, ErrorKind, Operation, ReadOutcome, ReconcileError, Reconciler,
    SecretDeclaration, TrackedResource,
};

use crate::git::validate_path;
use crate::kubeseal::{
    PublicKeyHash, PublicKeySource, SealedSecretDocument, Sealer,
    SecretManifest,
};
use k8s_openapi::api::core::v1::Secret;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

impl Reconciler {
    /// Seal the declaration and push it to its path
    ///
    /// # Errors
    ///
    /// Invalid declarations fail before any network or git call. Key resolution
    /// retries internally; every other failure is returned immediately.
    pub async fn create(
        &self,
        declaration: SecretDeclaration,
        cancel: &CancellationToken,
    ) -> Result<TrackedResource, ReconcileError> {
        self.write(Operation::Create, declaration, cancel).await
    }

    /// Identical to [`Reconciler::create`]; the artifact is re-sealed and overwritten
    ///
    /// # Errors
    ///
    /// See [`Reconciler::create`].
    pub async fn update(
        &self,
        declaration: SecretDeclaration,
        cancel: &CancellationToken,
    ) -> Result<TrackedResource, ReconcileError> {
        self.write(Operation::Update, declaration, cancel).await
    }

    async fn write(
        &self,
        operation: Operation,
        declaration: SecretDeclaration,
        cancel: &CancellationToken,
    ) -> Result<TrackedResource, ReconcileError> {
        let path = declaration.path.clone();
        let fail = |cause: Cause| ReconcileError::new(operation, path.as_str(), cause);

        let (path, manifest) = declaration
            .into_parts()
            .map_err(|e| fail(e.into()))?;
        validate_path(&path).map_err(|e| fail(e.into()))?;

        let span = info_span!("reconcile", operation = %operation, path = %path);
        async {
            let start = Instant::now();

            let key = self.keys.resolve(cancel).await.map_err(|e| fail(e.into()))?;
            let public_key_hash = key.hash();

            let artifact = self
                .sealer
                .seal(&manifest.to_secret(), &key)
                .map_err(|e| fail(e.into()))?;
            self.store
                .push(&artifact, &path)
                .await
                .map_err(|e| fail(e.into()))?;

            info!(
                "Sealed {}/{} to {} in {:.2}s",
                manifest.namespace(),
                manifest.name(),
                path,
                start.elapsed().as_secs_f64()
            );

            Ok(TrackedResource {
                path: path.clone(),
                name: manifest.name().to_string(),
                namespace: manifest.namespace().to_string(),
                secret_type: manifest.secret_type().to_string(),
                public_key_hash,
            })
        }
        .instrument(span)
        .await
    }

    /// Re-derive the state of the artifact at `path`
    ///
    /// `recorded` is the key hash stored at the last successful write or read.
    /// A mismatch with the controller's current key reports
    /// [`AbsentReason::KeyRotated`]; the stale file is left for the next create
    /// to overwrite. Without a recorded hash the artifact is reported Present.
    ///
    /// # Errors
    ///
    /// Content that does not parse as a sealed artifact is an error, not Absent.
    pub async fn read(
        &self,
        path: &str,
        recorded: Option<&PublicKeyHash>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, ReconcileError> {
        let fail = |cause: Cause| ReconcileError::new(Operation::Read, path, cause);
        let span = info_span!("reconcile", operation = %Operation::Read, path = %path);

        async {
            let bytes = match self.store.get_file(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    info!("{} no longer exists in the repository", path);
                    return Ok(ReadOutcome::Absent(AbsentReason::Missing));
                }
                Err(e) => return Err(fail(e.into())),
            };

            let document = SealedSecretDocument::parse(&bytes).map_err(|e| fail(e.into()))?;
            let key = self.keys.resolve(cancel).await.map_err(|e| fail(e.into()))?;
            let current = key.hash();

            if let Some(previous) = recorded {
                if *previous != current {
                    warn!(
                        "Controller key changed since {} was sealed ({} -> {}), marking for recreation",
                        path, previous, current
                    );
                    return Ok(ReadOutcome::Absent(AbsentReason::KeyRotated {
                        previous: previous.clone(),
                        current,
                    }));
                }
            }

            Ok(ReadOutcome::Present(TrackedResource {
                path: path.to_string(),
                name: document.secret_name().to_string(),
                namespace: document.secret_namespace().to_string(),
                secret_type: document.secret_type().to_string(),
                public_key_hash: current,
            }))
        }
        .instrument(span)
        .await
    }

    /// Remove the artifact at `path`
    ///
    /// # Errors
    ///
    /// Any store failure other than the file already being gone.
    pub async fn delete(&self, path: &str) -> Result<(), ReconcileError> {
        let span = info_span!("reconcile", operation = %Operation::Delete, path = %path);
        async {
            match self.store.delete_file(path).await {
                Ok(()) => {
                    info!("Deleted {}", path);
                    Ok(())
                }
                Err(e) if e.is_not_found() => {
                    info!("{} already absent", path);
                    Ok(())
                }
                Err(e) => Err(ReconcileError::new(Operation::Delete, path, e)),
            }
        }
        .instrument(span)
        .await
    }

    /// Seal an arbitrary Secret and return the artifact without touching the store
    ///
    /// # Errors
    ///
    /// See [`render`].
    pub async fn render(
        &self,
        secret: &Secret,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ReconcileError> {
        render(self.keys.as_ref(), self.sealer.as_ref(), secret, cancel).await
    }
}

/// Seal an arbitrary Secret against the current controller key
///
/// Needs no repository, so it backs local sealing to stdout as well.
///
/// # Errors
///
/// Invalid Secrets fail before the key is resolved; resolution and sealing
/// failures are wrapped with `namespace/name`.
pub async fn render(
    keys: &dyn PublicKeySource,
    sealer: &dyn Sealer,
    secret: &Secret,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, ReconcileError> {
    let target = format!(
        "{}/{}",
        secret.metadata.namespace.as_deref().unwrap_or_default(),
        secret.metadata.name.as_deref().unwrap_or_default()
    );
    let fail = |cause: Cause| ReconcileError::new(Operation::Render, target.as_str(), cause);

    SecretManifest::from_secret(secret).map_err(|e| fail(e.into()))?;
    let key = keys.resolve(cancel).await.map_err(|e| fail(e.into()))?;
    sealer.seal(secret, &key).map_err(|e| fail(e.into()))
}
