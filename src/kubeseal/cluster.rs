//! # Cluster Access
//!
//! The one call this crate makes against Kubernetes: an HTTP GET proxied
//! through the API server to the sealing controller's Service.

use async_trait::async_trait;
use kube::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Service (or path) does not exist yet, typically the controller is not deployed
    #[error("{target} not found: {message}")]
    NotFound { target: String, message: String },
    /// Service exists but has no ready endpoints
    #[error("{target} unavailable: {message}")]
    ServiceUnavailable { target: String, message: String },
    /// Any other failure talking to the API server
    #[error("request to {target} failed: {message}")]
    Request { target: String, message: String },
}

impl ClusterError {
    /// Whether the failure means "not ready yet" rather than "broken"
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::NotFound { .. } | ClusterError::ServiceUnavailable { .. }
        )
    }
}

/// Proxied read access to an in-cluster Service
#[async_trait]
pub trait ClusterProxy: Send + Sync {
    /// GET `path` on Service `name` in `namespace`, returning the raw body
    async fn get(&self, name: &str, namespace: &str, path: &str) -> Result<Vec<u8>, ClusterError>;
}

/// [`ClusterProxy`] backed by a kube client and the API server's service proxy
#[derive(Clone)]
pub struct KubeServiceProxy {
    client: Client,
}

impl std::fmt::Debug for KubeServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeServiceProxy").finish_non_exhaustive()
    }
}

impl KubeServiceProxy {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// API server path proxying plain HTTP to a named Service port
#[must_use]
pub fn service_proxy_path(name: &str, namespace: &str, path: &str) -> String {
    format!(
        "/api/v1/namespaces/{namespace}/services/http:{name}:/proxy/{}",
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl ClusterProxy for KubeServiceProxy {
    async fn get(&self, name: &str, namespace: &str, path: &str) -> Result<Vec<u8>, ClusterError> {
        let target = format!("service {namespace}/{name}");
        let uri = service_proxy_path(name, namespace, path);
        debug!("GET {}", uri);

        let request = http::Request::get(&uri)
            .body(Vec::new())
            .map_err(|e| ClusterError::Request {
                target: target.clone(),
                message: e.to_string(),
            })?;

        match self.client.request_text(request).await {
            Ok(body) => Ok(body.into_bytes()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(ClusterError::NotFound {
                target,
                message: api_err.message,
            }),
            Err(kube::Error::Api(api_err)) if api_err.code == 503 => {
                Err(ClusterError::ServiceUnavailable {
                    target,
                    message: api_err.message,
                })
            }
            Err(e) => Err(ClusterError::Request {
                target,
                message: e.to_string(),
            }),
        }
    }
}
