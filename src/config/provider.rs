//! # Provider Configuration
//!
//! Strongly typed settings for the git remote, the sealing controller and logging.
//! All settings have sensible defaults except the git remote, and every value is
//! validated once in [`ProviderConfig::from_env`].

use crate::constants::{
    DEFAULT_CONTROLLER_NAME, DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_GIT_AUTHOR_EMAIL,
    DEFAULT_GIT_AUTHOR_NAME, DEFAULT_KEY_FETCH_BACKOFF_MAX_MS, DEFAULT_KEY_FETCH_BACKOFF_MIN_MS,
    DEFAULT_KEY_FETCH_TIMEOUT_SECS,
};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("git remote is not configured (set GIT_URL)")]
    MissingGit,
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Git remote the sealed artifacts are committed to
#[derive(Clone)]
pub struct GitConfig {
    /// Repository URL (`https://`, `http://` or `file://`)
    pub url: String,
    /// Basic auth username
    pub username: String,
    /// Basic auth token, wiped from memory on drop
    pub token: Zeroizing<String>,
    /// Commit author name
    pub author_name: String,
    /// Commit author email
    pub author_email: String,
}

impl std::fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("token", &"***")
            .field("author_name", &self.author_name)
            .field("author_email", &self.author_email)
            .finish()
    }
}

impl GitConfig {
    /// Whether the remote is reached over http(s) and therefore needs basic auth
    #[must_use]
    pub fn is_http(&self) -> bool {
        self.url.starts_with("https://") || self.url.starts_with("http://")
    }
}

/// Location of the sealed secrets controller service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub name: String,
    pub namespace: String,
}

impl Default for ControllerRef {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONTROLLER_NAME.to_string(),
            namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
        }
    }
}

/// Retry policy for fetching the controller certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFetchConfig {
    /// Total time budget across all attempts
    pub timeout: Duration,
    /// Delay before the first retry
    pub backoff_min: Duration,
    /// Upper bound for the delay between retries
    pub backoff_max: Duration,
}

impl Default for KeyFetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_KEY_FETCH_TIMEOUT_SECS),
            backoff_min: Duration::from_millis(DEFAULT_KEY_FETCH_BACKOFF_MIN_MS),
            backoff_max: Duration::from_millis(DEFAULT_KEY_FETCH_BACKOFF_MAX_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Provider-level configuration
///
/// The git section is optional so that commands which never touch the
/// repository (sealing to stdout, fetching the certificate) can run without it.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub git: Option<GitConfig>,
    pub controller: ControllerRef,
    pub key_fetch: KeyFetchConfig,
    /// Kubeconfig context; in-cluster / default inference when unset
    pub kube_context: Option<String>,
    pub log: LogConfig,
}

impl ProviderConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a value is present but malformed, or when
    /// the git remote is only partially configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load configuration from an explicit variable map
    ///
    /// # Errors
    ///
    /// See [`ProviderConfig::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = Env(vars);

        let git = match env.string("GIT_URL") {
            Some(url) => Some(GitConfig {
                url,
                username: env.string("GIT_USERNAME").unwrap_or_default(),
                token: Zeroizing::new(env.string("GIT_TOKEN").unwrap_or_default()),
                author_name: env.string_or("GIT_AUTHOR_NAME", DEFAULT_GIT_AUTHOR_NAME),
                author_email: env.string_or("GIT_AUTHOR_EMAIL", DEFAULT_GIT_AUTHOR_EMAIL),
            }),
            None => None,
        };

        let config = Self {
            git,
            controller: ControllerRef {
                name: env.string_or("CONTROLLER_NAME", DEFAULT_CONTROLLER_NAME),
                namespace: env.string_or("CONTROLLER_NAMESPACE", DEFAULT_CONTROLLER_NAMESPACE),
            },
            key_fetch: KeyFetchConfig {
                timeout: Duration::from_secs(
                    env.number("KEY_FETCH_TIMEOUT_SECS", DEFAULT_KEY_FETCH_TIMEOUT_SECS)?,
                ),
                backoff_min: Duration::from_millis(
                    env.number("KEY_FETCH_BACKOFF_MIN_MS", DEFAULT_KEY_FETCH_BACKOFF_MIN_MS)?,
                ),
                backoff_max: Duration::from_millis(
                    env.number("KEY_FETCH_BACKOFF_MAX_MS", DEFAULT_KEY_FETCH_BACKOFF_MAX_MS)?,
                ),
            },
            kube_context: env.string("KUBE_CONTEXT"),
            log: LogConfig {
                level: env.string_or("LOG_LEVEL", "INFO"),
                format: match env.string("LOG_FORMAT").as_deref() {
                    None => LogFormat::Text,
                    Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
                    Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                    Some(v) => {
                        return Err(ConfigError::Invalid {
                            key: "LOG_FORMAT",
                            value: v.to_string(),
                            reason: "expected json or text",
                        })
                    }
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(git) = &self.git {
            if !(git.is_http() || git.url.starts_with("file://")) {
                return Err(ConfigError::Invalid {
                    key: "GIT_URL",
                    value: git.url.clone(),
                    reason: "expected an https://, http:// or file:// URL",
                });
            }
            if git.is_http() {
                if git.username.is_empty() {
                    return Err(ConfigError::Missing("GIT_USERNAME"));
                }
                if git.token.is_empty() {
                    return Err(ConfigError::Missing("GIT_TOKEN"));
                }
            }
        }

        if self.controller.name.is_empty() {
            return Err(ConfigError::Missing("CONTROLLER_NAME"));
        }
        if self.controller.namespace.is_empty() {
            return Err(ConfigError::Missing("CONTROLLER_NAMESPACE"));
        }

        if self.key_fetch.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "KEY_FETCH_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be greater than zero",
            });
        }
        if self.key_fetch.backoff_min > self.key_fetch.backoff_max {
            return Err(ConfigError::Invalid {
                key: "KEY_FETCH_BACKOFF_MIN_MS",
                value: self.key_fetch.backoff_min.as_millis().to_string(),
                reason: "must not exceed KEY_FETCH_BACKOFF_MAX_MS",
            });
        }

        Ok(())
    }

    /// Git section, required by every command that touches the repository
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingGit`] when `GIT_URL` was not set.
    pub fn git(&self) -> Result<&GitConfig, ConfigError> {
        self.git.as_ref().ok_or(ConfigError::MissingGit)
    }
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    /// Read variable, treating empty values as unset
    fn string(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn number(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key,
                value: v,
                reason: "expected a non-negative integer",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_git() {
        let config = ProviderConfig::from_vars(&HashMap::new()).unwrap();
        assert!(config.git.is_none());
        assert_eq!(config.controller, ControllerRef::default());
        assert_eq!(config.key_fetch.timeout, Duration::from_secs(180));
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.git().unwrap_err(), ConfigError::MissingGit);
    }

    #[test]
    fn test_https_remote_requires_credentials() {
        let err = ProviderConfig::from_vars(&vars(&[("GIT_URL", "https://git.example/repo.git")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing("GIT_USERNAME"));

        let err = ProviderConfig::from_vars(&vars(&[
            ("GIT_URL", "https://git.example/repo.git"),
            ("GIT_USERNAME", "bot"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("GIT_TOKEN"));
    }

    #[test]
    fn test_file_remote_needs_no_credentials() {
        let config =
            ProviderConfig::from_vars(&vars(&[("GIT_URL", "file:///srv/git/secrets.git")])).unwrap();
        let git = config.git().unwrap();
        assert!(!git.is_http());
        assert_eq!(git.author_name, "SEALEDSECRET-PROVIDER");
    }

    #[test]
    fn test_ssh_remote_rejected() {
        let err = ProviderConfig::from_vars(&vars(&[("GIT_URL", "git@github.com:org/repo.git")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GIT_URL", .. }));
    }

    #[test]
    fn test_token_hidden_from_debug() {
        let config = ProviderConfig::from_vars(&vars(&[
            ("GIT_URL", "https://git.example/repo.git"),
            ("GIT_USERNAME", "bot"),
            ("GIT_TOKEN", "ghp_supersecret"),
        ]))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_supersecret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_invalid_numbers_and_bounds() {
        let err = ProviderConfig::from_vars(&vars(&[("KEY_FETCH_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "KEY_FETCH_TIMEOUT_SECS",
                ..
            }
        ));

        let err = ProviderConfig::from_vars(&vars(&[("KEY_FETCH_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = ProviderConfig::from_vars(&vars(&[
            ("KEY_FETCH_BACKOFF_MIN_MS", "5000"),
            ("KEY_FETCH_BACKOFF_MAX_MS", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "KEY_FETCH_BACKOFF_MIN_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_log_format_parsing() {
        let config = ProviderConfig::from_vars(&vars(&[("LOG_FORMAT", "JSON")])).unwrap();
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(ProviderConfig::from_vars(&vars(&[("LOG_FORMAT", "xml")])).is_err());
    }
}
