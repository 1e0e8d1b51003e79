// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::context::ToolContext;
use crate::policy::GateCheck;

/// Declares a single parameter of a tool's input object.
///
/// The set of declared parameters doubles as the source for the JSON-schema
/// tool definition supplied to the model.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: &'static str,
    /// JSON type: "string", "number", "boolean", "object" or "array".
    pub kind: &'static str,
    pub description: &'static str,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: &'static str, kind: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }
}

/// Parsed tool input.
///
/// Models usually send a JSON object, but plain-text protocols produce bare
/// strings like `2+2`.  The dispatcher parses leniently: a non-JSON input is
/// treated as the value of the tool's primary (first required) parameter.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub raw: String,
    pub args: Value,
}

impl ToolInput {
    pub fn parse(raw: &str, primary_param: Option<&str>) -> Self {
        let trimmed = raw.trim();
        let args = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => match primary_param {
                Some(name) if !trimmed.is_empty() => {
                    let mut map = serde_json::Map::new();
                    map.insert(name.to_string(), Value::String(trimmed.to_string()));
                    Value::Object(map)
                }
                _ => Value::Object(serde_json::Map::new()),
            },
        };
        Self {
            raw: raw.to_string(),
            args,
        }
    }

    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    /// String argument with the raw input as fallback, mirroring the lenient
    /// `data.get(name) or input` convention of plain-text tool protocols.
    pub fn str_arg_or_raw(&self, name: &str) -> Option<String> {
        if let Some(v) = self.str_arg(name) {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
        let trimmed = self.raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn u64_arg(&self, name: &str) -> Option<u64> {
        self.args.get(name).and_then(Value::as_u64)
    }

    pub fn f64_arg(&self, name: &str) -> Option<f64> {
        self.args.get(name).and_then(Value::as_f64)
    }
}

/// Non-fatal tool failure: the message becomes the observation text and the
/// loop continues.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Trait that every built-in and user-defined tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Policy gate evaluated by the dispatcher before execution.
    ///
    /// Tools with no access-control surface keep the default `Allow`.
    fn gate(&self, _input: &ToolInput, _ctx: &ToolContext) -> GateCheck {
        GateCheck::Allow
    }

    /// Execute the tool.  Runs on a worker task, never on the streaming path.
    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
