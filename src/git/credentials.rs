//! # Git Credentials
//!
//! Basic auth for http(s) remotes is carried in the clone URL, so every later
//! push and fetch against `origin` reuses it without a credential helper.

use crate::config::GitConfig;
use url::Url;

/// Remote URL with credentials embedded when the remote is http(s)
///
/// Existing userinfo in the URL is replaced. Non-http URLs are returned unchanged.
#[must_use]
pub fn authenticated_url(config: &GitConfig) -> String {
    if !config.is_http() {
        return config.url.clone();
    }
    prepare_https_url(&config.url, &config.username, &config.token)
}

/// Inject `username:password` into an http(s) URL, percent-encoding both
pub(crate) fn prepare_https_url(repo_url: &str, username: &str, password: &str) -> String {
    let Ok(mut url) = Url::parse(repo_url) else {
        return repo_url.to_string();
    };
    if url.set_username(username).is_err() || url.set_password(Some(password)).is_err() {
        return repo_url.to_string();
    }
    url.to_string()
}

/// Replaces every occurrence of the given secrets in git output
#[derive(Clone, Default)]
pub(crate) struct Redactor {
    secrets: Vec<String>,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl Redactor {
    pub(crate) fn for_config(config: &GitConfig) -> Self {
        let mut secrets = Vec::new();
        if config.is_http() && !config.token.is_empty() {
            secrets.push(authenticated_url(config));
            secrets.push(config.token.to_string());
            // The encoded form shows up inside URLs echoed by git
            let encoded = prepare_https_url("https://host/", "u", &config.token);
            if let Some(pw) = Url::parse(&encoded).ok().and_then(|u| u.password().map(str::to_string)) {
                if pw != *config.token {
                    secrets.push(pw);
                }
            }
        }
        Self { secrets }
    }

    pub(crate) fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(text.trim().to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }
}
