//! # Controller Public Key
//!
//! Fetches the sealing controller's certificate, extracts its RSA public key
//! and fingerprints it for drift detection.
//!
//! The controller may not be deployed or ready when a reconciliation starts, so
//! the fetch runs under a bounded retry: "not found" and "service unavailable"
//! are waited out until the budget is spent, anything else aborts at once.

use crate::constants::CERT_PATH;
use crate::controller::retry::{retry_within_budget, Classification, RetryError, RetryPolicy};
use crate::kubeseal::cluster::{ClusterError, ClusterProxy};
use async_trait::async_trait;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use x509_parser::pem::Pem;
use x509_parser::public_key::PublicKey as SubjectPublicKey;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no PEM certificate found in controller response")]
    NoCertificate,
    #[error("invalid PEM block: {0}")]
    Pem(String),
    #[error("invalid certificate: {0}")]
    Certificate(String),
    /// The certificate carries a key that cannot seal (not RSA)
    #[error("expected an RSA public key, got {0}")]
    Format(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The controller never became reachable within the budget
    #[error("waiting for sealed secrets controller timed out after {attempts} attempts in {elapsed:?}: {source}")]
    Unavailable {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: ClusterError,
    },
    #[error(transparent)]
    Cluster(ClusterError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("public key resolution cancelled before any attempt completed")]
    Cancelled,
}

impl ResolveError {
    /// Whether the underlying cause is the controller not being ready yet
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Unavailable { .. } => true,
            ResolveError::Cluster(err) => err.is_transient(),
            ResolveError::Key(_) | ResolveError::Cancelled => false,
        }
    }
}

/// Fingerprint of a controller public key
///
/// SHA-256 (lowercase hex) over the decimal modulus followed by the decimal exponent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PublicKeyHash(String);

impl PublicKeyHash {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PublicKeyHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// RSA public key of the sealing controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    #[must_use]
    pub fn rsa(&self) -> &RsaPublicKey {
        &self.0
    }

    /// Stable fingerprint; identical for the same key however often it is fetched
    #[must_use]
    pub fn hash(&self) -> PublicKeyHash {
        use rsa::traits::PublicKeyParts;

        let identity = format!("{}{}", self.0.n(), self.0.e());
        PublicKeyHash(format!("{:x}", Sha256::digest(identity.as_bytes())))
    }

    /// Parse the first certificate of a PEM bundle and extract its RSA key
    ///
    /// # Errors
    ///
    /// [`KeyError::Format`] when the certificate key is not RSA; other
    /// [`KeyError`] variants for malformed input.
    pub fn from_certificate_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let block = Pem::iter_from_buffer(pem)
            .next()
            .ok_or(KeyError::NoCertificate)?
            .map_err(|e| KeyError::Pem(e.to_string()))?;
        let cert = block
            .parse_x509()
            .map_err(|e| KeyError::Certificate(e.to_string()))?;

        let spki = cert.public_key();
        let parsed = spki
            .parsed()
            .map_err(|e| KeyError::Certificate(e.to_string()))?;

        match parsed {
            SubjectPublicKey::RSA(rsa) => {
                let key = RsaPublicKey::new(
                    BigUint::from_bytes_be(rsa.modulus),
                    BigUint::from_bytes_be(rsa.exponent),
                )
                .map_err(|e| KeyError::Certificate(e.to_string()))?;
                Ok(Self(key))
            }
            other => Err(KeyError::Format(key_kind(&other).to_string())),
        }
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

fn key_kind(key: &SubjectPublicKey<'_>) -> &'static str {
    match key {
        SubjectPublicKey::RSA(_) => "RSA",
        SubjectPublicKey::EC(_) => "EC",
        SubjectPublicKey::DSA(_) => "DSA",
        _ => "unknown",
    }
}

/// Source of the current controller public key
#[async_trait]
pub trait PublicKeySource: Send + Sync {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<PublicKey, ResolveError>;
}

/// Resolves the controller key through a [`ClusterProxy`], with bounded retry
pub struct PublicKeyResolver {
    proxy: Arc<dyn ClusterProxy>,
    controller_name: String,
    controller_namespace: String,
    policy: RetryPolicy,
}

impl std::fmt::Debug for PublicKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyResolver")
            .field("controller_name", &self.controller_name)
            .field("controller_namespace", &self.controller_namespace)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PublicKeyResolver {
    #[must_use]
    pub fn new(
        proxy: Arc<dyn ClusterProxy>,
        controller_name: impl Into<String>,
        controller_namespace: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            proxy,
            controller_name: controller_name.into(),
            controller_namespace: controller_namespace.into(),
            policy,
        }
    }

    /// Fetch the raw certificate bundle, retrying while the controller is not ready
    ///
    /// # Errors
    ///
    /// See [`ResolveError`].
    pub async fn fetch_certificate(&self, cancel: &CancellationToken) -> Result<Vec<u8>, ResolveError> {
        let result = retry_within_budget(
            &self.policy,
            cancel,
            |err: &ClusterError| {
                if err.is_transient() {
                    Classification::Retryable
                } else {
                    Classification::Fatal
                }
            },
            |attempt| {
                debug!(attempt, "Trying to fetch the controller certificate");
                self.proxy
                    .get(&self.controller_name, &self.controller_namespace, CERT_PATH)
            },
        )
        .await;

        result.map_err(|err| match err {
            RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            } => ResolveError::Unavailable {
                attempts,
                elapsed,
                source: last,
            },
            RetryError::Fatal(err) => ResolveError::Cluster(err),
            RetryError::Cancelled { last, .. } => last.map_or(ResolveError::Cancelled, ResolveError::Cluster),
        })
    }
}

#[async_trait]
impl PublicKeySource for PublicKeyResolver {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<PublicKey, ResolveError> {
        let span = info_span!(
            "kubeseal.resolve_public_key",
            controller.name = %self.controller_name,
            controller.namespace = %self.controller_namespace
        );

        async move {
            let pem = self.fetch_certificate(cancel).await?;
            let key = PublicKey::from_certificate_pem(&pem)?;
            info!(public_key_hash = %key.hash(), "Fetched controller public key");
            Ok(key)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const CONTROLLER_CERT: &[u8] = include_bytes!("../../tests/fixtures/controller-cert.pem");
    const ROTATED_CERT: &[u8] = include_bytes!("../../tests/fixtures/rotated-cert.pem");
    const EC_CERT: &[u8] = include_bytes!("../../tests/fixtures/ec-cert.pem");

    /// Replays scripted responses, repeating the last one forever
    struct ScriptedProxy {
        responses: Mutex<VecDeque<Result<Vec<u8>, ClusterError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProxy {
        fn new(responses: Vec<Result<Vec<u8>, ClusterError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    fn clone_response(r: &Result<Vec<u8>, ClusterError>) -> Result<Vec<u8>, ClusterError> {
        match r {
            Ok(b) => Ok(b.clone()),
            Err(ClusterError::NotFound { target, message }) => Err(ClusterError::NotFound {
                target: target.clone(),
                message: message.clone(),
            }),
            Err(ClusterError::ServiceUnavailable { target, message }) => {
                Err(ClusterError::ServiceUnavailable {
                    target: target.clone(),
                    message: message.clone(),
                })
            }
            Err(ClusterError::Request { target, message }) => Err(ClusterError::Request {
                target: target.clone(),
                message: message.clone(),
            }),
        }
    }

    #[async_trait]
    impl ClusterProxy for ScriptedProxy {
        async fn get(&self, name: &str, namespace: &str, path: &str) -> Result<Vec<u8>, ClusterError> {
            assert_eq!(name, "sealed-secrets-controller");
            assert_eq!(namespace, "kube-system");
            assert_eq!(path, "/v1/cert.pem");
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                clone_response(responses.front().unwrap())
            }
        }
    }

    fn unavailable() -> Result<Vec<u8>, ClusterError> {
        Err(ClusterError::ServiceUnavailable {
            target: "service kube-system/sealed-secrets-controller".to_string(),
            message: "no endpoints available".to_string(),
        })
    }

    fn resolver(proxy: Arc<ScriptedProxy>) -> PublicKeyResolver {
        PublicKeyResolver::new(
            proxy,
            "sealed-secrets-controller",
            "kube-system",
            RetryPolicy {
                budget: Duration::from_secs(180),
                backoff_min: Duration::from_millis(500),
                backoff_max: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn test_parse_rsa_certificate() {
        let key = PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap();
        assert_eq!(key.hash().as_str().len(), 64);
    }

    #[test]
    fn test_hash_is_stable_and_rotation_changes_it() {
        let first = PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap();
        let again = PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap();
        let rotated = PublicKey::from_certificate_pem(ROTATED_CERT).unwrap();

        assert_eq!(first.hash(), again.hash());
        assert_ne!(first.hash(), rotated.hash());
    }

    #[test]
    fn test_bundle_uses_first_certificate() {
        let mut bundle = CONTROLLER_CERT.to_vec();
        bundle.extend_from_slice(ROTATED_CERT);
        let key = PublicKey::from_certificate_pem(&bundle).unwrap();
        assert_eq!(
            key.hash(),
            PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap().hash()
        );
    }

    #[test]
    fn test_non_rsa_key_is_format_error() {
        let err = PublicKey::from_certificate_pem(EC_CERT).unwrap_err();
        assert!(matches!(err, KeyError::Format(ref kind) if kind == "EC"), "{err:?}");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            PublicKey::from_certificate_pem(b"not a certificate").unwrap_err(),
            KeyError::NoCertificate | KeyError::Pem(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_waits_for_controller() {
        let proxy = Arc::new(ScriptedProxy::new(vec![
            Err(ClusterError::NotFound {
                target: "service kube-system/sealed-secrets-controller".to_string(),
                message: "services \"sealed-secrets-controller\" not found".to_string(),
            }),
            unavailable(),
            Ok(CONTROLLER_CERT.to_vec()),
        ]));

        let key = resolver(proxy.clone())
            .resolve(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(proxy.calls(), 3);
        assert_eq!(
            key.hash(),
            PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap().hash()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_gives_up_at_budget_with_transient_cause() {
        let proxy = Arc::new(ScriptedProxy::new(vec![unavailable()]));
        let start = tokio::time::Instant::now();

        let err = resolver(proxy.clone())
            .resolve(&CancellationToken::new())
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(180), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(181), "overran budget: {elapsed:?}");
        assert!(err.is_transient());
        assert!(matches!(
            err,
            ResolveError::Unavailable {
                source: ClusterError::ServiceUnavailable { .. },
                ..
            }
        ));
        assert!(proxy.calls() > 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_aborts_on_fatal_error() {
        let proxy = Arc::new(ScriptedProxy::new(vec![Err(ClusterError::Request {
            target: "service kube-system/sealed-secrets-controller".to_string(),
            message: "Unauthorized".to_string(),
        })]));

        let err = resolver(proxy.clone())
            .resolve(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(proxy.calls(), 1);
        assert!(matches!(err, ResolveError::Cluster(ClusterError::Request { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_malformed_certificate_is_fatal() {
        let proxy = Arc::new(ScriptedProxy::new(vec![Ok(EC_CERT.to_vec())]));

        let err = resolver(proxy.clone())
            .resolve(&CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(proxy.calls(), 1);
        assert!(matches!(err, ResolveError::Key(KeyError::Format(_))));
    }
}
