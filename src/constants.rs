//! # Constants
//!
//! Shared constants used throughout the provider.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default service name of the sealed secrets controller
pub const DEFAULT_CONTROLLER_NAME: &str = "sealed-secrets-controller";

/// Default namespace the sealed secrets controller runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kube-system";

/// Path the controller serves its public certificate on (through the service proxy)
pub const CERT_PATH: &str = "/v1/cert.pem";

/// Default total budget for public key resolution (seconds)
/// The controller may still be deploying when the first reconciliation runs
pub const DEFAULT_KEY_FETCH_TIMEOUT_SECS: u64 = 180;

/// Default minimum delay between public key fetch attempts (milliseconds)
pub const DEFAULT_KEY_FETCH_BACKOFF_MIN_MS: u64 = 500;

/// Default maximum delay between public key fetch attempts (milliseconds)
pub const DEFAULT_KEY_FETCH_BACKOFF_MAX_MS: u64 = 10_000;

/// Prefix of every commit message written to the repository
pub const COMMIT_MESSAGE_PREFIX: &str = "[SEALEDSECRET-PROVIDER]";

/// Default commit author name
pub const DEFAULT_GIT_AUTHOR_NAME: &str = "SEALEDSECRET-PROVIDER";

/// Default commit author email
pub const DEFAULT_GIT_AUTHOR_EMAIL: &str = "sealedsecret-provider@localhost";

/// Remote every push and fetch goes to
pub const GIT_REMOTE: &str = "origin";

/// Secret type used when the declaration does not name one
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";

/// API version of the sealed artifact document
pub const SEALED_SECRET_API_VERSION: &str = "bitnami.com/v1alpha1";

/// Kind of the sealed artifact document
pub const SEALED_SECRET_KIND: &str = "SealedSecret";

/// Size of the AES-256-GCM session key generated per sealed value
pub const SESSION_KEY_BYTES: usize = 32;
