// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use crate::rows::SessionRow;
use crate::{now, Store};

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get("id")?,
        title: row.get("title")?,
        config_id: row.get("config_id")?,
        work_path: row.get("work_path")?,
        context_summary: row.get("context_summary")?,
        last_compressed_call_id: row.get("last_compressed_call_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        message_count: row.get("message_count").unwrap_or(0),
    })
}

const SESSION_SELECT: &str = "SELECT s.*, COUNT(m.id) AS message_count \
     FROM sessions s LEFT JOIN messages m ON s.id = m.session_id";

impl Store {
    pub fn create_session(
        &self,
        title: &str,
        config_id: &str,
        work_path: Option<&str>,
    ) -> anyhow::Result<SessionRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO sessions (id, title, config_id, work_path, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, title, config_id, work_path, ts],
            )
            .context("inserting session")?;
        }
        self.get_session(&id)?
            .context("session vanished after insert")
    }

    pub fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRow>> {
        let conn = self.lock();
        let sql = format!("{SESSION_SELECT} WHERE s.id = ?1 GROUP BY s.id");
        let row = conn.query_row(&sql, [id], row_to_session).optional()?;
        Ok(row)
    }

    pub fn list_sessions(&self) -> anyhow::Result<Vec<SessionRow>> {
        let conn = self.lock();
        let sql = format!("{SESSION_SELECT} GROUP BY s.id ORDER BY s.updated_at DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_session_title(&self, id: &str, title: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sessions SET title = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, title, now()],
        )?;
        Ok(())
    }

    /// Persist the compressor's outcome on the owning session.
    pub fn update_session_compression(
        &self,
        id: &str,
        summary: &str,
        last_compressed_call_id: i64,
    ) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sessions SET context_summary = ?2, last_compressed_call_id = ?3, \
             updated_at = ?4 WHERE id = ?1",
            params![id, summary, last_compressed_call_id, now()],
        )?;
        Ok(())
    }

    /// Delete a session and, via cascade, all of its messages, steps, calls,
    /// snapshots and attachments.
    pub fn delete_session(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.lock();
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let n = conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        // permission_requests carry no FK (the approver may outlive the
        // session); clear them explicitly.
        conn.execute(
            "DELETE FROM permission_requests WHERE session_id = ?1",
            [id],
        )?;
        Ok(n > 0)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
