// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::Config;

/// Process-wide, copy-on-write configuration handle.
///
/// Readers take a cheap `Arc<Config>` snapshot and never observe a partially
/// applied update; writers build a whole new `Config` under the lock and swap
/// it in atomically.  When a persist path is set, every successful update is
/// also written back to disk so that an approver process reading the same
/// file sees the change (e.g. a freshly auto-approved shell command).
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
    persist_path: Option<PathBuf>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
            persist_path: None,
        }
    }

    /// Persist every update to `path` as YAML (best effort).
    pub fn with_persist_path(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    /// Current consistent snapshot.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Apply `f` to a copy of the current config and swap the result in.
    /// Returns the new snapshot.
    pub fn update(&self, f: impl FnOnce(&mut Config)) -> Arc<Config> {
        let mut guard = self.inner.write().expect("config lock poisoned");
        let mut next = (**guard).clone();
        f(&mut next);
        let next = Arc::new(next.normalized());
        *guard = next.clone();
        drop(guard);

        if let Some(path) = &self.persist_path {
            if let Err(e) = persist(path, &next) {
                warn!(path = %path.display(), "failed to persist config update: {e}");
            }
        }
        next
    }

    /// Append a command basename to the shell allowlist if not yet present.
    /// Returns true when the list changed.
    pub fn allowlist_insert(&self, basename: &str) -> bool {
        if basename.is_empty() {
            return false;
        }
        let mut changed = false;
        self.update(|cfg| {
            if !cfg.shell.allows(basename) {
                cfg.shell.allowlist.push(basename.to_string());
                changed = true;
            }
        });
        changed
    }
}

fn persist(path: &std::path::Path, config: &Config) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
