//! # Configuration
//!
//! Provider configuration, loaded once at startup from environment variables.

mod provider;

pub use provider::{
    ConfigError, ControllerRef, GitConfig, KeyFetchConfig, LogConfig, LogFormat, ProviderConfig,
};
