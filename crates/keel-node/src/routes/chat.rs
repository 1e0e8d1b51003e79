// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use keel_config::AgentMode;
use keel_core::{StepKind, TurnEvent, TurnRequest};
use keel_store::AttachmentRow;

use crate::attachments::{preprocess_attachment, RawAttachment};
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub config_id: Option<String>,
    #[serde(default)]
    pub work_path: Option<String>,
    #[serde(default)]
    pub agent_mode: Option<String>,
    #[serde(default)]
    pub shell_unrestricted: bool,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
}

fn to_turn_request(req: ChatRequest) -> Result<TurnRequest, ApiError> {
    let agent_mode = match req.agent_mode.as_deref() {
        None | Some("") => AgentMode::Default,
        Some(mode) => mode
            .parse()
            .map_err(|e| ApiError::bad_request(format!("{e}")))?,
    };
    let mut attachments = Vec::with_capacity(req.attachments.len());
    for raw in &req.attachments {
        attachments.push(
            preprocess_attachment(raw)
                .map_err(|e| ApiError::bad_request(format!("attachment rejected: {e}")))?,
        );
    }
    Ok(TurnRequest {
        message: req.message,
        session_id: req.session_id,
        config_id: req.config_id,
        work_path: req.work_path,
        agent_mode,
        shell_unrestricted: req.shell_unrestricted,
        attachments,
    })
}

fn attachment_json(rows: &[AttachmentRow]) -> Value {
    // Metadata only — the payload stays in the store.
    Value::Array(
        rows.iter()
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
            .collect(),
    )
}

fn event_json(event: &TurnEvent) -> Value {
    match event {
        TurnEvent::Started {
            session_id,
            user_message_id,
            assistant_message_id,
            user_attachments,
        } => json!({
            "session_id": session_id,
            "user_message_id": user_message_id,
            "assistant_message_id": assistant_message_id,
            "user_attachments": attachment_json(user_attachments),
        }),
        TurnEvent::Step(step) => serde_json::to_value(step).unwrap_or_else(|_| json!({})),
        TurnEvent::Done { session_id } => json!({ "done": true, "session_id": session_id }),
        TurnEvent::Error { message } => json!({ "error": message }),
    }
}

/// POST /chat/stream — the streaming agent endpoint.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let turn = to_turn_request(req)?;
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
    let runtime = state.runtime.clone();
    tokio::spawn(async move {
        runtime.run_turn(turn, tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let payload = event_json(&event);
            yield Ok(Event::default().data(payload.to_string()));
        }
    };
    Ok(Sse::new(stream))
}

/// POST /chat — non-streaming: runs the turn to completion and returns the
/// final reply.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let turn = to_turn_request(req)?;
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
    let runtime = state.runtime.clone();
    let handle = tokio::spawn(async move {
        runtime.run_turn(turn, tx).await;
    });

    let mut session_id = String::new();
    let mut message_id: i64 = 0;
    let mut reply = String::new();
    let mut error: Option<String> = None;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Started {
                session_id: sid,
                assistant_message_id,
                ..
            } => {
                session_id = sid;
                message_id = assistant_message_id;
            }
            TurnEvent::Step(step) if step.kind == StepKind::Answer => {
                reply = step.content;
            }
            TurnEvent::Error { message } => error = Some(message),
            _ => {}
        }
    }
    let _ = handle.await;

    if let Some(message) = error {
        return Err(ApiError::Internal(anyhow::anyhow!(message)));
    }
    Ok(Json(json!({
        "reply": reply,
        "session_id": session_id,
        "message_id": message_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub message_id: i64,
}

/// POST /chat/stop — sets the stop event for the target assistant message.
pub async fn chat_stop(
    State(state): State<AppState>,
    Json(req): Json<StopRequest>,
) -> Json<Value> {
    let stopped = state.runtime.stop_turn(req.message_id);
    Json(json!({ "stopped": stopped }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub message_id: i64,
}

/// POST /chat/rollback — restore the workspace snapshot, then delete the
/// dialogue at and after the target message.
pub async fn chat_rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<Value>, ApiError> {
    let report = state.runtime.rollback(req.message_id).await?;
    Ok(Json(json!({
        "session_id": report.session_id,
        "deleted_messages": report.deleted_messages,
        "snapshot_restored": report.snapshot_restored,
    })))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
