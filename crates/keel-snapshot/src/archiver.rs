// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

/// Content-addressed workspace snapshots built on git tree objects.
///
/// When the work path sits inside an existing git checkout, that checkout's
/// object store is used directly.  Otherwise a hidden bare-ish repository is
/// lazily initialized under the archiver's base directory, keyed by a hash of
/// the absolute work path, so snapshots never pollute the workspace itself.
///
/// A snapshot is: fresh temporary index → stage the whole tree (`add -A`) →
/// `write-tree`.  The resulting tree hash is the snapshot identifier.
/// Restore reads the tree into a temporary index, checks out every entry over
/// the working tree, then deletes untracked files to make the match exact.
pub struct WorkspaceArchiver {
    base_dir: PathBuf,
}

/// Directories that never belong in a snapshot.
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "node_modules/",
    "dist/",
    "build/",
    ".venv/",
    "venv/",
    "__pycache__/",
    "target/",
    ".npm-cache/",
];

struct RepoContext {
    root: PathBuf,
    /// GIT_DIR / GIT_WORK_TREE overrides for the hidden-repo case;
    /// empty when an existing checkout is used.
    env: HashMap<String, String>,
}

impl WorkspaceArchiver {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Stage the working tree and return the tree hash identifying it.
    pub async fn create_tree(&self, work_path: &Path) -> anyhow::Result<String> {
        let ctx = self.repo_context(work_path).await?;
        let index = tempfile::tempdir().context("creating temporary index dir")?;
        let index_file = index.path().join("index");

        run_git(&["add", "-A"], &ctx.root, &ctx.env, Some(&index_file)).await?;
        let tree = run_git(&["write-tree"], &ctx.root, &ctx.env, Some(&index_file)).await?;
        if tree.is_empty() {
            bail!("git write-tree produced no output");
        }
        debug!(tree = %tree, path = %work_path.display(), "snapshot tree written");
        Ok(tree)
    }

    /// Overwrite the working tree with the contents of `tree_hash` and delete
    /// anything the tree does not contain (excluded paths stay untouched).
    pub async fn restore(&self, tree_hash: &str, work_path: &Path) -> anyhow::Result<()> {
        if tree_hash.is_empty() {
            bail!("missing snapshot tree hash");
        }
        let ctx = self.repo_context(work_path).await?;
        let index = tempfile::tempdir().context("creating temporary index dir")?;
        let index_file = index.path().join("index");

        run_git(&["read-tree", tree_hash], &ctx.root, &ctx.env, Some(&index_file)).await?;
        run_git(
            &["checkout-index", "-a", "-f"],
            &ctx.root,
            &ctx.env,
            Some(&index_file),
        )
        .await?;
        run_git(&["clean", "-fd"], &ctx.root, &ctx.env, Some(&index_file)).await?;
        debug!(tree = %tree_hash, path = %work_path.display(), "snapshot restored");
        Ok(())
    }

    async fn repo_context(&self, work_path: &Path) -> anyhow::Result<RepoContext> {
        let root = work_path
            .canonicalize()
            .with_context(|| format!("resolving work path {}", work_path.display()))?;

        // Inside an existing checkout? Use its object store directly.
        if let Ok(top) = run_git(&["rev-parse", "--show-toplevel"], &root, &HashMap::new(), None)
            .await
        {
            if !top.is_empty() {
                return Ok(RepoContext {
                    root: PathBuf::from(top),
                    env: HashMap::new(),
                });
            }
        }

        // Hidden per-workspace repository under the snapshot base dir.
        let git_dir = self.hidden_repo_dir(&root);
        let mut env = HashMap::new();
        env.insert("GIT_DIR".to_string(), git_dir.display().to_string());
        env.insert("GIT_WORK_TREE".to_string(), root.display().to_string());

        if !git_dir.is_dir() {
            std::fs::create_dir_all(
                git_dir
                    .parent()
                    .context("hidden repo dir has no parent")?,
            )?;
            run_git(&["init", "--quiet"], &root, &env, None).await?;
            write_default_excludes(&git_dir);
        }
        Ok(RepoContext { root, env })
    }

    fn hidden_repo_dir(&self, canonical_work_path: &Path) -> PathBuf {
        let digest = Sha256::digest(canonical_work_path.display().to_string().as_bytes());
        let key = hex::encode(&digest[..8]);
        self.base_dir.join(key).join("git")
    }
}

fn write_default_excludes(git_dir: &Path) {
    let info_dir = git_dir.join("info");
    if std::fs::create_dir_all(&info_dir).is_err() {
        return;
    }
    let exclude = info_dir.join("exclude");
    if exclude.exists() {
        return;
    }
    let _ = std::fs::write(&exclude, DEFAULT_EXCLUDES.join("\n") + "\n");
}

async fn run_git(
    args: &[&str],
    cwd: &Path,
    env: &HashMap<String, String>,
    index_file: Option<&Path>,
) -> anyhow::Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(cwd);
    for (k, v) in env {
        cmd.env(k, v);
    }
    if let Some(index) = index_file {
        cmd.env("GIT_INDEX_FILE", index);
    }
    let output = cmd.output().await.context("running git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = stderr.trim();
        bail!(
            "git {} failed: {}",
            args.join(" "),
            if message.is_empty() { stdout.trim() } else { message }
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
