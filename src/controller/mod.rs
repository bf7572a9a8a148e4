//! # Controller
//!
//! Retry machinery and the reconciler that composes key resolution, sealing
//! and the git-backed store.

pub mod backoff;
pub mod reconciler;
pub mod retry;
