//! # Sealing
//!
//! Turns a plaintext Secret into a `SealedSecret` document that only the
//! controller holding the matching private key can decrypt.
//!
//! Each value is encrypted with its own random AES-256-GCM session key; the
//! session key is wrapped with RSA-OAEP (SHA-256) under the label
//! `<namespace>/<name>`, binding the ciphertext to that Secret identity:
//!
//! ```text
//! u16 BE len(wrapped key) || wrapped key || AES-GCM(session key, zero nonce, value)
//! ```

use crate::constants::{SEALED_SECRET_API_VERSION, SEALED_SECRET_KIND, SESSION_KEY_BYTES};
use crate::kubeseal::manifest::SecretManifest;
use crate::kubeseal::public_key::PublicKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroizing;

/// Annotation kubectl writes with the full applied object, plaintext included
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// GCM nonce size; every session key encrypts exactly one value
const NONCE_BYTES: usize = 12;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("unable to create a secret with empty data")]
    EmptyData,
    #[error("invalid secret manifest: {0}")]
    InvalidManifest(String),
    #[error("unable to seal secret: {0}")]
    Encryption(String),
    #[error("unable to encode sealed secret: {0}")]
    Encode(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("not a sealed secret document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("expected kind {SEALED_SECRET_KIND}, found {0:?}")]
    UnexpectedKind(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretTemplate {
    pub metadata: ArtifactMetadata,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecretSpec {
    #[serde(default)]
    pub encrypted_data: BTreeMap<String, String>,
    pub template: SecretTemplate,
}

/// The sealed artifact as stored in the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecretDocument {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
    pub spec: SealedSecretSpec,
}

impl SealedSecretDocument {
    /// Parse a stored artifact
    ///
    /// # Errors
    ///
    /// [`ArtifactError`] when the bytes are not a `SealedSecret` document.
    pub fn parse(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let doc: Self = serde_yaml::from_slice(bytes)?;
        if doc.kind != SEALED_SECRET_KIND {
            return Err(ArtifactError::UnexpectedKind(doc.kind));
        }
        Ok(doc)
    }

    /// Name of the Secret the controller will create
    #[must_use]
    pub fn secret_name(&self) -> &str {
        &self.spec.template.metadata.name
    }

    #[must_use]
    pub fn secret_namespace(&self) -> &str {
        &self.spec.template.metadata.namespace
    }

    /// Secret type, `Opaque` when the template leaves it out
    #[must_use]
    pub fn secret_type(&self) -> &str {
        self.spec
            .template
            .type_
            .as_deref()
            .unwrap_or(crate::constants::DEFAULT_SECRET_TYPE)
    }
}

/// Encrypts Secrets against a controller public key
pub trait Sealer: Send + Sync {
    /// Seal `secret`, returning the serialized `SealedSecret` document
    ///
    /// # Errors
    ///
    /// See [`SealError`]; never retryable.
    fn seal(&self, secret: &Secret, key: &PublicKey) -> Result<Vec<u8>, SealError>;
}

/// Sealer producing documents the sealed secrets controller decrypts
#[derive(Debug, Clone, Copy, Default)]
pub struct KubesealSealer;

impl Sealer for KubesealSealer {
    fn seal(&self, secret: &Secret, key: &PublicKey) -> Result<Vec<u8>, SealError> {
        let mut metadata = secret.metadata.clone();
        strip_server_metadata(&mut metadata);

        let manifest = SecretManifest::from_secret(secret)?;
        let name = manifest.name().to_string();
        let namespace = manifest.namespace().to_string();

        let label = format!("{namespace}/{name}");
        let mut encrypted_data = BTreeMap::new();
        for (k, v) in manifest.data() {
            let ciphertext = hybrid_encrypt(key.rsa(), &label, v)?;
            encrypted_data.insert(k.clone(), BASE64.encode(ciphertext));
        }

        let template_metadata = ArtifactMetadata {
            name: name.clone(),
            namespace: namespace.clone(),
            labels: metadata.labels.clone().unwrap_or_default(),
            annotations: metadata.annotations.clone().unwrap_or_default(),
        };

        let doc = SealedSecretDocument {
            api_version: SEALED_SECRET_API_VERSION.to_string(),
            kind: SEALED_SECRET_KIND.to_string(),
            metadata: ArtifactMetadata {
                name,
                namespace,
                ..ArtifactMetadata::default()
            },
            spec: SealedSecretSpec {
                encrypted_data,
                template: SecretTemplate {
                    metadata: template_metadata,
                    type_: Some(manifest.secret_type().to_string()),
                },
            },
        };

        Ok(serde_yaml::to_string(&doc)?.into_bytes())
    }
}

/// Clear everything the API server populates, so the artifact depends only on
/// user-declared fields
pub fn strip_server_metadata(metadata: &mut ObjectMeta) {
    metadata.self_link = None;
    metadata.uid = None;
    metadata.resource_version = None;
    metadata.generation = None;
    metadata.creation_timestamp = None;
    metadata.deletion_timestamp = None;
    metadata.deletion_grace_period_seconds = None;
    metadata.managed_fields = None;
    if let Some(annotations) = metadata.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
    }
}

/// Encrypt one value for the controller
///
/// # Errors
///
/// [`SealError::Encryption`] if the RSA wrap or AES-GCM encryption fails.
pub fn hybrid_encrypt(key: &RsaPublicKey, label: &str, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let mut rng = OsRng;
    let mut session_key = Zeroizing::new([0u8; SESSION_KEY_BYTES]);
    rng.fill_bytes(&mut session_key[..]);

    let wrapped = key
        .encrypt(&mut rng, Oaep::new_with_label::<Sha256, _>(label), &session_key[..])
        .map_err(|e| SealError::Encryption(e.to_string()))?;
    let wrapped_len = u16::try_from(wrapped.len())
        .map_err(|_| SealError::Encryption("wrapped session key too large".to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(&session_key[..])
        .map_err(|e| SealError::Encryption(e.to_string()))?;
    let zero_nonce = [0u8; NONCE_BYTES];
    let sealed = cipher
        .encrypt(Nonce::from_slice(&zero_nonce), plaintext)
        .map_err(|e| SealError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(2 + wrapped.len() + sealed.len());
    out.extend_from_slice(&wrapped_len.to_be_bytes());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&sealed);
    Ok(out)
}
