//! # Kubeseal
//!
//! Everything needed to produce a sealed artifact: access to the controller
//! Service, public key resolution, the plaintext manifest and the sealer.

pub mod cluster;
pub mod manifest;
pub mod public_key;
pub mod seal;

pub use cluster::{ClusterError, ClusterProxy, KubeServiceProxy};
pub use manifest::SecretManifest;
pub use public_key::{
    KeyError, PublicKey, PublicKeyHash, PublicKeyResolver, PublicKeySource, ResolveError,
};
pub use seal::{
    ArtifactError, KubesealSealer, SealError, SealedSecretDocument, Sealer,
};
