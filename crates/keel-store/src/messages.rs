// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use crate::rows::{AttachmentRow, MessageRow};
use crate::{now, Store};

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: row.get("role")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_attachment(row: &Row<'_>) -> rusqlite::Result<AttachmentRow> {
    Ok(AttachmentRow {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        filename: row.get("filename")?,
        media_type: row.get("media_type")?,
        width: row.get("width")?,
        height: row.get("height")?,
        byte_size: row.get("byte_size")?,
        data: row.get("data")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn create_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> anyhow::Result<MessageRow> {
        let ts = now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role, content, ts],
        )
        .context("inserting message")?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
            params![session_id, ts],
        )?;
        Ok(MessageRow {
            id,
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: ts,
        })
    }

    pub fn get_message(&self, id: i64) -> anyhow::Result<Option<MessageRow>> {
        let conn = self.lock();
        let row = conn
            .query_row("SELECT * FROM messages WHERE id = ?1", [id], row_to_message)
            .optional()?;
        Ok(row)
    }

    pub fn update_message_content(&self, id: i64, content: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE messages SET content = ?2 WHERE id = ?1",
            params![id, content],
        )?;
        Ok(())
    }

    /// All messages of a session, oldest first.
    pub fn session_messages(&self, session_id: &str) -> anyhow::Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM messages WHERE session_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([session_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Dialogue (user/assistant) messages with id strictly greater than
    /// `after_id`, oldest first.  `None` means "from the beginning".
    pub fn dialogue_messages_after(
        &self,
        session_id: &str,
        after_id: Option<i64>,
    ) -> anyhow::Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE session_id = ?1 AND id > ?2 \
             AND role IN ('user', 'assistant') ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, after_id.unwrap_or(0)], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Dialogue messages with `from_id <= id <= to_id`, oldest first.
    pub fn dialogue_messages_between(
        &self,
        session_id: &str,
        from_id: i64,
        to_id: i64,
    ) -> anyhow::Result<Vec<MessageRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE session_id = ?1 AND id >= ?2 AND id <= ?3 \
             AND role IN ('user', 'assistant') ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, from_id, to_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete all messages of the session with `id >= from_id`.
    /// Steps, tool calls and attachments go with them via cascade.
    /// Returns the number of deleted messages.
    pub fn delete_messages_from(&self, session_id: &str, from_id: i64) -> anyhow::Result<usize> {
        let conn = self.lock();
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let n = conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND id >= ?2",
            params![session_id, from_id],
        )?;
        Ok(n)
    }

    // ── Attachments ──────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn create_attachment(
        &self,
        message_id: i64,
        filename: &str,
        media_type: &str,
        width: i64,
        height: i64,
        byte_size: i64,
        data: &str,
    ) -> anyhow::Result<AttachmentRow> {
        let ts = now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO attachments (message_id, filename, media_type, width, height, \
             byte_size, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![message_id, filename, media_type, width, height, byte_size, data, ts],
        )
        .context("inserting attachment")?;
        let id = conn.last_insert_rowid();
        Ok(AttachmentRow {
            id,
            message_id,
            filename: filename.to_string(),
            media_type: media_type.to_string(),
            width,
            height,
            byte_size,
            data: data.to_string(),
            created_at: ts,
        })
    }

    pub fn attachments_for_message(&self, message_id: i64) -> anyhow::Result<Vec<AttachmentRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM attachments WHERE message_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([message_id], row_to_attachment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
