// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Discrete event kinds emitted by the agent loop.
///
/// Delta kinds stream to clients but are never persisted; every other kind
/// is both emitted and stored with a dense per-message sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    Action,
    Observation,
    Answer,
    Error,
    Reasoning,
    ContentDelta,
    ReasoningDelta,
    ToolCallDelta,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Thought => "thought",
            StepKind::Action => "action",
            StepKind::Observation => "observation",
            StepKind::Answer => "answer",
            StepKind::Error => "error",
            StepKind::Reasoning => "reasoning",
            StepKind::ContentDelta => "content_delta",
            StepKind::ReasoningDelta => "reasoning_delta",
            StepKind::ToolCallDelta => "tool_call_delta",
        }
    }

    /// Streaming-only kinds are transmitted but not persisted.
    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            StepKind::ContentDelta | StepKind::ReasoningDelta | StepKind::ToolCallDelta
        )
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One event of the reason-act-observe loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    #[serde(rename = "step_type")]
    pub kind: StepKind,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AgentStep {
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
