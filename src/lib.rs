//! SealedSecret Git Provider Library
//!
//! Seals Kubernetes Secrets against the public key of an in-cluster sealed
//! secrets controller and records the sealed artifacts in a git repository
//! instead of applying them to the cluster.
//!
//! ## Quick Start
//!
//! ```rust
//! use sealedsecret_git::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod git;
pub mod kubeseal;
pub mod observability;
pub mod prelude;
pub mod resource;
