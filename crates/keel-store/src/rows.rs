// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use keel_model::ModelProfile;

/// A stored model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRow {
    pub id: String,
    pub name: String,
    pub api_format: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: i64,
    pub max_context_tokens: i64,
    pub is_default: bool,
    pub created_at: String,
}

impl ConfigRow {
    /// Runtime shape consumed by the model crate.
    pub fn to_profile(&self) -> ModelProfile {
        ModelProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            api_format: self.api_format.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature as f32,
            max_tokens: self.max_tokens.max(0) as u32,
            max_context_tokens: self.max_context_tokens.max(0) as u32,
        }
    }
}

/// Fields accepted when creating or updating a config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpsert {
    pub name: String,
    #[serde(default)]
    pub api_format: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub max_context_tokens: Option<i64>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: String,
    pub title: String,
    pub config_id: String,
    pub work_path: Option<String>,
    /// Running context summary maintained by the compressor.
    pub context_summary: String,
    /// Boundary: id of the last model call folded into the summary.
    pub last_compressed_call_id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    pub id: i64,
    pub message_id: i64,
    pub step_type: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub sequence: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub id: i64,
    pub message_id: i64,
    pub tool_name: String,
    pub tool_input: String,
    pub tool_output: String,
    pub created_at: String,
}

/// One model invocation record.  The compressor's boundary arithmetic walks
/// these rows ordered by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRow {
    pub id: i64,
    pub session_id: String,
    pub message_id: Option<i64>,
    pub iteration: i64,
    pub streaming: bool,
    pub profile: String,
    pub api_format: String,
    pub request_payload: String,
    pub response_payload: Option<String>,
    pub response_text: String,
    pub processed_text: String,
    pub created_at: String,
}

/// Insert shape for a model invocation.
#[derive(Debug, Clone, Default)]
pub struct LlmCallRecord {
    pub session_id: String,
    pub message_id: Option<i64>,
    pub iteration: i64,
    pub streaming: bool,
    pub profile: String,
    pub api_format: String,
    pub request_payload: String,
    pub response_payload: Option<String>,
    pub response_text: String,
    pub processed_text: String,
}

/// Minimal call view used when choosing a compression boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCallMeta {
    pub id: i64,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl PermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStatus::Pending => "pending",
            PermissionStatus::Approved => "approved",
            PermissionStatus::Denied => "denied",
            PermissionStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PermissionStatus::Pending)
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRow {
    pub id: i64,
    pub session_id: Option<String>,
    pub tool_name: String,
    pub action: String,
    pub path: String,
    pub reason: String,
    pub status: PermissionStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub session_id: String,
    pub message_id: i64,
    pub tree_hash: String,
    pub work_path: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub media_type: String,
    pub width: i64,
    pub height: i64,
    pub byte_size: i64,
    /// Base64-encoded image payload after re-encoding.
    pub data: String,
    pub created_at: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_row_to_profile_maps_fields() {
        let row = ConfigRow {
            id: "c1".into(),
            name: "dev".into(),
            api_format: "openai_chat".into(),
            api_key: "sk".into(),
            base_url: Some("http://localhost/v1".into()),
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_tokens: 1000,
            max_context_tokens: 8000,
            is_default: true,
            created_at: "now".into(),
        };
        let p = row.to_profile();
        assert_eq!(p.model, "gpt-4o");
        assert_eq!(p.max_context_tokens, 8000);
        assert!((p.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn config_row_to_profile_clamps_negative_sizes() {
        let row = ConfigRow {
            id: String::new(),
            name: String::new(),
            api_format: String::new(),
            api_key: String::new(),
            base_url: None,
            model: String::new(),
            temperature: 0.0,
            max_tokens: -5,
            max_context_tokens: -1,
            is_default: false,
            created_at: String::new(),
        };
        let p = row.to_profile();
        assert_eq!(p.max_tokens, 0);
        assert_eq!(p.max_context_tokens, 0);
    }

    #[test]
    fn permission_status_round_trip() {
        for s in [
            PermissionStatus::Pending,
            PermissionStatus::Approved,
            PermissionStatus::Denied,
            PermissionStatus::Timeout,
        ] {
            assert_eq!(PermissionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PermissionStatus::parse("bogus"), None);
    }

    #[test]
    fn permission_status_terminality() {
        assert!(!PermissionStatus::Pending.is_terminal());
        assert!(PermissionStatus::Approved.is_terminal());
        assert!(PermissionStatus::Denied.is_terminal());
        assert!(PermissionStatus::Timeout.is_terminal());
    }
}
