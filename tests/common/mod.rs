//! Common test utilities for integration tests
//!
//! - `RemoteRepo`: a local bare repository seeded with one commit, reachable
//!   through a `file://` URL
//! - `FakeKeys`: a controller key source that can rotate or become unavailable
//! - `MemoryStore`: an in-memory artifact store that counts calls

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use async_trait::async_trait;
use sealedsecret_git::config::GitConfig;
use sealedsecret_git::git::{validate_path, ArtifactStore, StoreError};
use sealedsecret_git::kubeseal::{ClusterError, PublicKey, PublicKeySource, ResolveError};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

pub const CONTROLLER_CERT: &[u8] = include_bytes!("../fixtures/controller-cert.pem");
pub const ROTATED_CERT: &[u8] = include_bytes!("../fixtures/rotated-cert.pem");

pub fn controller_key() -> PublicKey {
    PublicKey::from_certificate_pem(CONTROLLER_CERT).unwrap()
}

pub fn rotated_key() -> PublicKey {
    PublicKey::from_certificate_pem(ROTATED_CERT).unwrap()
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git must be installed to run these tests");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

/// Bare repository on local disk with a single initial commit on `main`
pub struct RemoteRepo {
    _dir: TempDir,
    bare: PathBuf,
}

impl RemoteRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("remote.git");
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();

        git(
            dir.path(),
            &["init", "--quiet", "--bare", "--initial-branch=main", "remote.git"],
        );
        git(&seed, &["init", "--quiet", "--initial-branch=main"]);
        std::fs::write(seed.join("README.md"), "sealed secrets\n").unwrap();
        git(&seed, &["add", "README.md"]);
        git(
            &seed,
            &[
                "-c",
                "user.name=seed",
                "-c",
                "user.email=seed@localhost",
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "-m",
                "initial commit",
            ],
        );
        git(&seed, &["push", "--quiet", bare.to_str().unwrap(), "HEAD"]);

        Self { _dir: dir, bare }
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.bare.display())
    }

    pub fn git_config(&self) -> GitConfig {
        GitConfig {
            url: self.url(),
            username: String::new(),
            token: Zeroizing::new(String::new()),
            author_name: "SEALEDSECRET-PROVIDER".to_string(),
            author_email: "sealedsecret-provider@localhost".to_string(),
        }
    }

    /// Install a `pre-receive` hook that declines every push
    pub fn decline_pushes(&self) {
        let hook = self.bare.join("hooks").join("pre-receive");
        std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
        std::fs::write(&hook, "#!/bin/sh\necho 'pushes are frozen' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Remove the hook installed by [`RemoteRepo::decline_pushes`]
    pub fn accept_pushes(&self) {
        std::fs::remove_file(self.bare.join("hooks").join("pre-receive")).unwrap();
    }

    /// Commit subjects on `main`, newest first
    pub fn log(&self) -> Vec<String> {
        git(&self.bare, &["log", "--format=%s", "main"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Content of `path` at the tip of `main`, if present
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        let output = Command::new("git")
            .args(["show", &format!("main:{path}")])
            .current_dir(&self.bare)
            .output()
            .unwrap();
        output.status.success().then_some(output.stdout)
    }
}

/// Key source returning a swappable key
pub struct FakeKeys {
    key: Mutex<PublicKey>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl FakeKeys {
    pub fn new(key: PublicKey) -> Self {
        Self {
            key: Mutex::new(key),
            unavailable: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rotate(&self, key: PublicKey) {
        *self.key.lock().unwrap() = key;
    }

    /// Behave like a controller that never became ready within the budget
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicKeySource for FakeKeys {
    async fn resolve(&self, _cancel: &CancellationToken) -> Result<PublicKey, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResolveError::Unavailable {
                attempts: 12,
                elapsed: Duration::from_secs(180),
                source: ClusterError::ServiceUnavailable {
                    target: "kube-system/sealed-secrets-controller".to_string(),
                    message: "no endpoints available".to_string(),
                },
            });
        }
        Ok(self.key.lock().unwrap().clone())
    }
}

/// In-memory store with the same path rules and not-found semantics as git
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    reject_pushes: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn reject_pushes(&self) {
        self.reject_pushes.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn push(&self, content: &[u8], path: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        validate_path(path)?;
        if self.reject_pushes.load(Ordering::SeqCst) {
            return Err(StoreError::PushRejected {
                path: path.to_string(),
                reason: "! [rejected] HEAD -> main (fetch first)".to_string(),
            });
        }
        self.insert(path, content);
        Ok(())
    }

    async fn get_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.content(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })
    }

    async fn delete_file(&self, path: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.files.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }
}
