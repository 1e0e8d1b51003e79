// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use keel_store::PermissionStatus;

use crate::error::ApiError;
use crate::AppState;

/// GET /permissions/pending — requests awaiting an operator decision.
pub async fn pending_permissions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pending = state.store.pending_permission_requests()?;
    Ok(Json(json!({ "requests": pending })))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// "approved" or "denied"
    pub status: String,
}

/// POST /permissions/:id — the operator's decision.  The blocked tool
/// observes it within one polling interval.
pub async fn decide_permission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = match PermissionStatus::parse(&req.status) {
        Some(s @ (PermissionStatus::Approved | PermissionStatus::Denied)) => s,
        _ => {
            return Err(ApiError::bad_request(
                "status must be \"approved\" or \"denied\"",
            ))
        }
    };
    let existing = state
        .broker
        .get(id)?
        .ok_or_else(|| ApiError::not_found("permission request"))?;
    if existing.status.is_terminal() {
        return Err(ApiError::bad_request("request already decided"));
    }
    state.broker.update(id, status)?;
    Ok(Json(json!({ "id": id, "status": status.as_str() })))
}
