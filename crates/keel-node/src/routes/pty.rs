// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use keel_pty::SpawnOptions;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OpenPtyRequest {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

/// POST /sessions/:id/pty — start an interactive process.
pub async fn open_pty(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<OpenPtyRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.command.trim().is_empty() {
        return Err(ApiError::bad_request("command is required"));
    }
    let proc = keel_pty::spawn_pty(
        &session_id,
        SpawnOptions {
            command: req.command,
            cwd: req.cwd.map(std::path::PathBuf::from),
            buffer_size: req.buffer_size,
            idle_timeout_ms: req.idle_timeout_ms.unwrap_or(0),
            ..SpawnOptions::default()
        },
    )?;
    let pty_id = state.pty.register(proc);
    Ok(Json(json!({ "pty_id": pty_id })))
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub cursor: Option<u64>,
    #[serde(default)]
    pub max_output: Option<usize>,
}

/// GET /sessions/:id/pty/:pty_id — cursor read of buffered output.
pub async fn read_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<Value>, ApiError> {
    let proc = state
        .pty
        .get(&session_id, &pty_id)
        .ok_or_else(|| ApiError::not_found("pty"))?;
    let (text, cursor, reset) = proc.read(query.cursor, query.max_output.unwrap_or(65536));
    Ok(Json(json!({
        "text": text,
        "cursor": cursor,
        "reset": reset,
        "status": proc.status().as_str(),
        "exit_code": proc.exit_code(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub data: String,
}

/// POST /sessions/:id/pty/:pty_id/write — forward input bytes.
pub async fn write_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(String, String)>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<Value>, ApiError> {
    let proc = state
        .pty
        .get(&session_id, &pty_id)
        .ok_or_else(|| ApiError::not_found("pty"))?;
    let written = proc
        .write(req.data.as_bytes())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("pty write failed: {e}")))?;
    Ok(Json(json!({ "bytes_written": written })))
}

/// DELETE /sessions/:id/pty/:pty_id — close and deregister.
pub async fn close_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    if !state.pty.close(&session_id, &pty_id) {
        return Err(ApiError::not_found("pty"));
    }
    Ok(Json(json!({ "closed": true })))
}
