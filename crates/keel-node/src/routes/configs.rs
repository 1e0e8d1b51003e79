// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use keel_store::ConfigUpsert;

use crate::error::ApiError;
use crate::AppState;

/// GET /configs
pub async fn list_configs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let configs = state.store.list_configs()?;
    Ok(Json(json!({ "configs": configs })))
}

/// GET /configs/:id
pub async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let config = state
        .store
        .get_config(&id)?
        .ok_or_else(|| ApiError::not_found("config"))?;
    Ok(Json(serde_json::to_value(config).unwrap_or_default()))
}

/// POST /configs
pub async fn create_config(
    State(state): State<AppState>,
    Json(input): Json<ConfigUpsert>,
) -> Result<Json<Value>, ApiError> {
    if input.name.is_empty() || input.model.is_empty() {
        return Err(ApiError::bad_request("name and model are required"));
    }
    let row = state.store.create_config(&input)?;
    Ok(Json(serde_json::to_value(row).unwrap_or_default()))
}

/// PUT /configs/:id
pub async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ConfigUpsert>,
) -> Result<Json<Value>, ApiError> {
    let row = state
        .store
        .update_config(&id, &input)?
        .ok_or_else(|| ApiError::not_found("config"))?;
    Ok(Json(serde_json::to_value(row).unwrap_or_default()))
}

/// DELETE /configs/:id
pub async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_config(&id)? {
        return Err(ApiError::not_found("config"));
    }
    Ok(Json(json!({ "deleted": true })))
}
