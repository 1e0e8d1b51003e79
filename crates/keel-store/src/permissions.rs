// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::rows::{PermissionRow, PermissionStatus};
use crate::{now, Store};

/// How often a blocked tool re-reads its request row.
///
/// Polling — rather than signaling — is intentional: the approver may be a
/// separate process writing the same database, and a poll interval of 500 ms
/// bounds how stale the waiter's view can get.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn row_to_permission(row: &Row<'_>) -> rusqlite::Result<PermissionRow> {
    let status: String = row.get("status")?;
    Ok(PermissionRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        tool_name: row.get("tool_name")?,
        action: row.get("action")?,
        path: row.get("path")?,
        reason: row.get("reason")?,
        status: PermissionStatus::parse(&status).unwrap_or(PermissionStatus::Pending),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn create_permission_request(
        &self,
        tool_name: &str,
        action: &str,
        path: &str,
        reason: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<i64> {
        let ts = now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO permission_requests (session_id, tool_name, action, path, reason, \
             status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
            params![session_id, tool_name, action, path, reason, ts],
        )
        .context("inserting permission request")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_permission_request(&self, id: i64) -> anyhow::Result<Option<PermissionRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT * FROM permission_requests WHERE id = ?1",
                [id],
                row_to_permission,
            )
            .optional()?;
        Ok(row)
    }

    pub fn update_permission_request(
        &self,
        id: i64,
        status: PermissionStatus,
    ) -> anyhow::Result<bool> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE permission_requests SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now()],
        )?;
        Ok(n > 0)
    }

    pub fn pending_permission_requests(&self) -> anyhow::Result<Vec<PermissionRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM permission_requests WHERE status = 'pending' ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_permission)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Out-of-band approval queue shared by every tool invocation in the process.
///
/// Reads are lock-free snapshots of the underlying row; the waiting side
/// holds no repository locks between polls, so an approver — in-process or a
/// different process on the same database — can transition the row at any
/// time.
#[derive(Clone)]
pub struct PermissionBroker {
    store: Arc<Store>,
}

impl PermissionBroker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        tool_name: &str,
        action: &str,
        path: &str,
        reason: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<i64> {
        let id = self
            .store
            .create_permission_request(tool_name, action, path, reason, session_id)?;
        debug!(id, tool_name, reason, "permission request filed");
        Ok(id)
    }

    pub fn get(&self, id: i64) -> anyhow::Result<Option<PermissionRow>> {
        self.store.get_permission_request(id)
    }

    pub fn update(&self, id: i64, status: PermissionStatus) -> anyhow::Result<bool> {
        self.store.update_permission_request(id, status)
    }

    /// Poll until the request reaches a terminal status or `timeout` elapses.
    ///
    /// On expiry the request itself is transitioned to `timeout` so the
    /// operator UI stops showing it as actionable.
    pub async fn wait_for_decision(
        &self,
        id: i64,
        timeout: Duration,
    ) -> anyhow::Result<PermissionStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.store.get_permission_request(id)? {
                Some(row) if row.status.is_terminal() => return Ok(row.status),
                Some(_) => {}
                None => {
                    warn!(id, "permission request disappeared while waiting");
                    return Ok(PermissionStatus::Denied);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = self.store.update_permission_request(id, PermissionStatus::Timeout);
                return Ok(PermissionStatus::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> PermissionBroker {
        PermissionBroker::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn create_starts_pending() {
        let b = broker();
        let id = b
            .create("run_shell", "execute", "ls", "Command not in allowlist.", None)
            .unwrap();
        let row = b.get(id).unwrap().unwrap();
        assert_eq!(row.status, PermissionStatus::Pending);
        assert_eq!(row.tool_name, "run_shell");
        assert!(row.reason.contains("allowlist"));
    }

    #[test]
    fn update_transitions_status() {
        let b = broker();
        let id = b.create("run_shell", "execute", "ls", "r", None).unwrap();
        assert!(b.update(id, PermissionStatus::Approved).unwrap());
        assert_eq!(b.get(id).unwrap().unwrap().status, PermissionStatus::Approved);
        assert!(!b.update(9999, PermissionStatus::Denied).unwrap());
    }

    #[tokio::test]
    async fn wait_returns_decision_written_by_another_task() {
        let b = broker();
        let id = b.create("run_shell", "execute", "ls", "r", None).unwrap();
        let approver = b.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            approver.update(id, PermissionStatus::Approved).unwrap();
        });
        let status = b.wait_for_decision(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status, PermissionStatus::Approved);
    }

    #[tokio::test]
    async fn wait_times_out_and_marks_row() {
        let b = broker();
        let id = b.create("run_shell", "execute", "ls", "r", None).unwrap();
        let status = b
            .wait_for_decision(id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(status, PermissionStatus::Timeout);
        assert_eq!(b.get(id).unwrap().unwrap().status, PermissionStatus::Timeout);
    }

    #[tokio::test]
    async fn wait_on_missing_request_denies() {
        let b = broker();
        let status = b
            .wait_for_decision(424242, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(status, PermissionStatus::Denied);
    }

    #[test]
    fn pending_listing_excludes_decided() {
        let b = broker();
        let a = b.create("run_shell", "execute", "ls", "r", None).unwrap();
        let c = b.create("run_shell", "execute", "rm", "r", None).unwrap();
        b.update(a, PermissionStatus::Denied).unwrap();
        let pending = b.store.pending_permission_requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c);
    }
}
