//! # Secret Manifest
//!
//! The plaintext Secret a user declares, validated before anything touches the
//! network or the repository.

use crate::constants::DEFAULT_SECRET_TYPE;
use crate::kubeseal::seal::SealError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use zeroize::Zeroize;

/// Declared, not yet encrypted Secret
///
/// Values are wiped from memory when the manifest is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretManifest {
    name: String,
    namespace: String,
    secret_type: String,
    data: BTreeMap<String, Vec<u8>>,
}

impl std::fmt::Debug for SecretManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManifest")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("type", &self.secret_type)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for SecretManifest {
    fn drop(&mut self) {
        for value in self.data.values_mut() {
            value.zeroize();
        }
    }
}

impl SecretManifest {
    /// Build a manifest; `secret_type` falls back to `Opaque`
    ///
    /// # Errors
    ///
    /// [`SealError::EmptyData`] when `data` has no entries,
    /// [`SealError::InvalidManifest`] when name, namespace or a key is empty.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        secret_type: Option<String>,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, SealError> {
        let manifest = Self {
            name: name.into(),
            namespace: namespace.into(),
            secret_type: secret_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_SECRET_TYPE.to_string()),
            data,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Build a manifest from an existing Secret object
    ///
    /// `stringData` entries are folded into `data`, overriding duplicates as the
    /// API server would.
    ///
    /// # Errors
    ///
    /// Same as [`SecretManifest::new`].
    pub fn from_secret(secret: &Secret) -> Result<Self, SealError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        Self::new(name, namespace, secret.type_.clone(), merged_data(secret))
    }

    fn validate(&self) -> Result<(), SealError> {
        if self.data.is_empty() {
            return Err(SealError::EmptyData);
        }
        if self.name.is_empty() {
            return Err(SealError::InvalidManifest("metadata.name is required".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(SealError::InvalidManifest(
                "metadata.namespace is required".to_string(),
            ));
        }
        if self.data.keys().any(String::is_empty) {
            return Err(SealError::InvalidManifest("data keys must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn secret_type(&self) -> &str {
        &self.secret_type
    }

    pub(crate) fn data(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.data
    }

    /// Render as a core/v1 Secret carrying only user-declared fields
    #[must_use]
    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            type_: Some(self.secret_type.clone()),
            data: Some(
                self.data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }
}

/// `data` with `stringData` folded in
pub(crate) fn merged_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut data: BTreeMap<String, Vec<u8>> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), v.0.clone()))
        .collect();
    for (k, v) in secret.string_data.iter().flatten() {
        data.insert(k.clone(), v.as_bytes().to_vec());
    }
    data
}
