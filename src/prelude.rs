//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use sealedsecret_git::prelude::*;
//! ```

// Seams - implement these to swap out the cluster, key source, sealer or store
pub use crate::git::ArtifactStore;
pub use crate::kubeseal::{ClusterProxy, PublicKeySource, Sealer};

// Default implementations
pub use crate::git::GitStore;
pub use crate::kubeseal::{KubeServiceProxy, KubesealSealer, PublicKeyResolver};

// Reconciler types - core provider functionality
pub use crate::controller::reconciler::{
    AbsentReason, ErrorKind, ReadOutcome, ReconcileError, Reconciler, SecretDeclaration,
    TrackedResource,
};
pub use crate::controller::retry::RetryPolicy;

// Config types
pub use crate::config::{ConfigError, GitConfig, ProviderConfig};

// Domain types and errors
pub use crate::git::StoreError;
pub use crate::kubeseal::{PublicKey, PublicKeyHash, ResolveError, SealError, SecretManifest};
