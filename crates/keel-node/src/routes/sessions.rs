// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = state.store.list_sessions()?;
    Ok(Json(json!({ "sessions": sessions })))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .get_session(&id)?
        .ok_or_else(|| ApiError::not_found("session"))?;
    Ok(Json(serde_json::to_value(session).unwrap_or_default()))
}

/// DELETE /sessions/:id — cascades to every child row and closes the
/// session's interactive terminals.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.store.delete_session(&id)?;
    if !deleted {
        return Err(ApiError::not_found("session"));
    }
    let closed = state.pty.close_session(&id);
    Ok(Json(json!({ "deleted": true, "ptys_closed": closed })))
}

/// GET /sessions/:id/messages — messages with steps, tool calls and
/// attachment metadata expanded for the client.
pub async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(ApiError::not_found("session"));
    }
    let mut out = Vec::new();
    for message in state.store.session_messages(&id)? {
        let steps = state.store.agent_steps_for_message(message.id)?;
        let tool_calls = state.store.tool_calls_for_message(message.id)?;
        let attachments: Vec<Value> = state
            .store
            .attachments_for_message(message.id)?
            .into_iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "filename": a.filename,
                    "media_type": a.media_type,
                    "width": a.width,
                    "height": a.height,
                    "byte_size": a.byte_size,
                })
            })
            .collect();
        out.push(json!({
            "id": message.id,
            "role": message.role,
            "content": message.content,
            "created_at": message.created_at,
            "steps": steps,
            "tool_calls": tool_calls,
            "attachments": attachments,
        }));
    }
    Ok(Json(json!({ "messages": out })))
}
