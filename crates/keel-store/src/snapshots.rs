// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use crate::rows::SnapshotRow;
use crate::{now, Store};

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        message_id: row.get("message_id")?,
        tree_hash: row.get("tree_hash")?,
        work_path: row.get("work_path")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_snapshot(
        &self,
        session_id: &str,
        message_id: i64,
        tree_hash: &str,
        work_path: &str,
    ) -> anyhow::Result<SnapshotRow> {
        let ts = now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO snapshots (session_id, message_id, tree_hash, work_path, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, message_id, tree_hash, work_path, ts],
        )
        .context("inserting snapshot")?;
        Ok(SnapshotRow {
            id: conn.last_insert_rowid(),
            session_id: session_id.to_string(),
            message_id,
            tree_hash: tree_hash.to_string(),
            work_path: work_path.to_string(),
            created_at: ts,
        })
    }

    pub fn get_snapshot(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> anyhow::Result<Option<SnapshotRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM snapshots WHERE session_id = ?1 AND message_id = ?2",
                params![session_id, message_id],
                row_to_snapshot,
            )
            .optional()?;
        Ok(row)
    }

    /// Earliest snapshot whose owning message id is at or after `message_id`.
    /// Rollback uses this to find the workspace state at the moment the
    /// target message began processing.
    pub fn first_snapshot_at_or_after(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> anyhow::Result<Option<SnapshotRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM snapshots WHERE session_id = ?1 AND message_id >= ?2 \
                 ORDER BY message_id ASC LIMIT 1",
                params![session_id, message_id],
                row_to_snapshot,
            )
            .optional()?;
        Ok(row)
    }

    /// Drop snapshots taken at or after the restored point.
    pub fn delete_snapshots_from(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> anyhow::Result<usize> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM snapshots WHERE session_id = ?1 AND message_id >= ?2",
            params![session_id, message_id],
        )?;
        Ok(n)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::Store;

    fn seeded() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        let s = store.create_session("t", "c", Some("/w")).unwrap();
        (store, s.id)
    }

    #[test]
    fn snapshot_round_trip() {
        let (store, sid) = seeded();
        store.create_snapshot(&sid, 4, "abc123", "/w").unwrap();
        let got = store.get_snapshot(&sid, 4).unwrap().unwrap();
        assert_eq!(got.tree_hash, "abc123");
        assert!(store.get_snapshot(&sid, 5).unwrap().is_none());
    }

    #[test]
    fn first_snapshot_at_or_after_picks_earliest() {
        let (store, sid) = seeded();
        store.create_snapshot(&sid, 2, "t2", "/w").unwrap();
        store.create_snapshot(&sid, 4, "t4", "/w").unwrap();
        store.create_snapshot(&sid, 6, "t6", "/w").unwrap();
        let hit = store.first_snapshot_at_or_after(&sid, 3).unwrap().unwrap();
        assert_eq!(hit.tree_hash, "t4");
        let none = store.first_snapshot_at_or_after(&sid, 7).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn delete_snapshots_from_trims_tail() {
        let (store, sid) = seeded();
        store.create_snapshot(&sid, 2, "t2", "/w").unwrap();
        store.create_snapshot(&sid, 4, "t4", "/w").unwrap();
        let n = store.delete_snapshots_from(&sid, 3).unwrap();
        assert_eq!(n, 1);
        assert!(store.get_snapshot(&sid, 4).unwrap().is_none());
        assert!(store.get_snapshot(&sid, 2).unwrap().is_some());
    }
}
