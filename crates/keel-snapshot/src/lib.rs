// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod archiver;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use keel_store::Store;

pub use archiver::WorkspaceArchiver;

/// Repository-backed snapshot service.
///
/// Ties tree hashes produced by the [`WorkspaceArchiver`] to
/// `(session, assistant message)` rows so a rollback can find the workspace
/// state at the moment a message began processing.
pub struct SnapshotStore {
    store: Arc<Store>,
    archiver: WorkspaceArchiver,
}

impl SnapshotStore {
    pub fn new(store: Arc<Store>, archiver: WorkspaceArchiver) -> Self {
        Self { store, archiver }
    }

    /// Take a snapshot for the given assistant message unless one already
    /// exists.  Returns the tree hash.
    pub async fn ensure_snapshot(
        &self,
        session_id: &str,
        message_id: i64,
        work_path: &Path,
    ) -> anyhow::Result<String> {
        if let Some(existing) = self.store.get_snapshot(session_id, message_id)? {
            debug!(message_id, tree = %existing.tree_hash, "snapshot already present");
            return Ok(existing.tree_hash);
        }
        let tree = self.archiver.create_tree(work_path).await?;
        self.store.create_snapshot(
            session_id,
            message_id,
            &tree,
            &work_path.display().to_string(),
        )?;
        Ok(tree)
    }

    /// Restore the workspace to the state recorded at or after `message_id`,
    /// then drop the now-invalid later snapshots.
    ///
    /// Returns `Ok(true)` when a snapshot was found and restored, `Ok(false)`
    /// when the session has no snapshot covering that point.  A restore
    /// failure propagates as an error — callers must not roll back dialogue
    /// when the workspace could not be restored.
    pub async fn restore_at(&self, session_id: &str, message_id: i64) -> anyhow::Result<bool> {
        let Some(snapshot) = self.store.first_snapshot_at_or_after(session_id, message_id)? else {
            return Ok(false);
        };
        self.archiver
            .restore(&snapshot.tree_hash, Path::new(&snapshot.work_path))
            .await?;
        self.store.delete_snapshots_from(session_id, message_id)?;
        Ok(true)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
