// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use rusqlite::{params, OptionalExtension, Row};

use crate::rows::{LlmCallMeta, LlmCallRecord, LlmCallRow, StepRow, ToolCallRow};
use crate::{now, Store};

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<StepRow> {
    let metadata: Option<String> = row.get("metadata")?;
    Ok(StepRow {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        step_type: row.get("step_type")?,
        content: row.get("content")?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        sequence: row.get("sequence")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_tool_call(row: &Row<'_>) -> rusqlite::Result<ToolCallRow> {
    Ok(ToolCallRow {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        tool_name: row.get("tool_name")?,
        tool_input: row.get("tool_input")?,
        tool_output: row.get("tool_output")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_llm_call(row: &Row<'_>) -> rusqlite::Result<LlmCallRow> {
    Ok(LlmCallRow {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        message_id: row.get("message_id")?,
        iteration: row.get("iteration")?,
        streaming: row.get::<_, i64>("streaming")? != 0,
        profile: row.get("profile")?,
        api_format: row.get("api_format")?,
        request_payload: row.get("request_payload")?,
        response_payload: row.get("response_payload")?,
        response_text: row.get("response_text")?,
        processed_text: row.get("processed_text")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    // ── Agent steps ──────────────────────────────────────────────────────────

    pub fn save_agent_step(
        &self,
        message_id: i64,
        step_type: &str,
        content: &str,
        metadata: &serde_json::Value,
        sequence: i64,
    ) -> anyhow::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO agent_steps (message_id, step_type, content, metadata, sequence, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message_id,
                step_type,
                content,
                serde_json::to_string(metadata)?,
                sequence,
                now(),
            ],
        )
        .context("inserting agent step")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn agent_steps_for_message(&self, message_id: i64) -> anyhow::Result<Vec<StepRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM agent_steps WHERE message_id = ?1 ORDER BY sequence ASC",
        )?;
        let rows = stmt
            .query_map([message_id], row_to_step)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Steps for a batch of assistant messages, ordered message then sequence.
    /// The context builder uses this to interleave tool rounds into history.
    pub fn agent_steps_for_messages(
        &self,
        message_ids: &[i64],
    ) -> anyhow::Result<Vec<StepRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.lock();
        let placeholders = vec!["?"; message_ids.len()].join(",");
        let sql = format!(
            "SELECT * FROM agent_steps WHERE message_id IN ({placeholders}) \
             ORDER BY message_id ASC, sequence ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(message_ids.iter()), row_to_step)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Tool calls ───────────────────────────────────────────────────────────

    pub fn save_tool_call(
        &self,
        message_id: i64,
        tool_name: &str,
        tool_input: &str,
    ) -> anyhow::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tool_calls (message_id, tool_name, tool_input, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![message_id, tool_name, tool_input, now()],
        )
        .context("inserting tool call")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_tool_call_output(&self, id: i64, output: &str) -> anyhow::Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE tool_calls SET tool_output = ?2 WHERE id = ?1",
            params![id, output],
        )?;
        Ok(())
    }

    pub fn tool_calls_for_message(&self, message_id: i64) -> anyhow::Result<Vec<ToolCallRow>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM tool_calls WHERE message_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([message_id], row_to_tool_call)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── LLM calls ────────────────────────────────────────────────────────────

    pub fn save_llm_call(&self, rec: &LlmCallRecord) -> anyhow::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO llm_calls (session_id, message_id, iteration, streaming, profile, \
             api_format, request_payload, response_payload, response_text, processed_text, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rec.session_id,
                rec.message_id,
                rec.iteration,
                rec.streaming as i64,
                rec.profile,
                rec.api_format,
                rec.request_payload,
                rec.response_payload,
                rec.response_text,
                rec.processed_text,
                now(),
            ],
        )
        .context("inserting llm call")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_llm_call(&self, id: i64) -> anyhow::Result<Option<LlmCallRow>> {
        let conn = self.lock();
        let row = conn
            .query_row("SELECT * FROM llm_calls WHERE id = ?1", [id], row_to_llm_call)
            .optional()?;
        Ok(row)
    }

    /// Call metas with id strictly greater than `after_call_id`, ordered by id.
    pub fn llm_call_metas_after(
        &self,
        session_id: &str,
        after_call_id: i64,
    ) -> anyhow::Result<Vec<LlmCallMeta>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message_id FROM llm_calls WHERE session_id = ?1 AND id > ?2 \
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id, after_call_id], |row| {
                Ok(LlmCallMeta {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove call records owned by messages at or after `message_id`.
    /// Rollback uses this so the boundary arithmetic never sees calls whose
    /// dialogue rows were deleted.
    pub fn delete_llm_calls_from(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> anyhow::Result<usize> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM llm_calls WHERE session_id = ?1 AND message_id >= ?2",
            params![session_id, message_id],
        )?;
        Ok(n)
    }

    /// The owning message id of a model call — the compression boundary maps
    /// a call id back to the dialogue position it belongs to.
    pub fn message_id_for_llm_call(
        &self,
        session_id: &str,
        call_id: i64,
    ) -> anyhow::Result<Option<i64>> {
        let conn = self.lock();
        let row: Option<Option<i64>> = conn
            .query_row(
                "SELECT message_id FROM llm_calls WHERE session_id = ?1 AND id = ?2",
                params![session_id, call_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.flatten())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
