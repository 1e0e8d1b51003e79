// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::tool::{Tool, ToolParameter};

/// A tool schema — the JSON-schema definition handed to the model.
/// Mirrors the model crate's shape to keep this crate independent of it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Case-insensitive lookup — models frequently vary the casing of tool
    /// names in plain-text protocols.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if let Some(tool) = self.tools.get(name) {
            return Some(tool.clone());
        }
        self.tools
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, tool)| tool.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// `- name: description` lines for the plain-text system prompt.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// JSON-schema definitions for every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: parameters_schema(&t.parameters()),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the JSON-schema `parameters` object from a declared parameter list.
pub fn parameters_schema(params: &[ToolParameter]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in params {
        let kind = match param.kind {
            "string" | "number" | "boolean" | "object" | "array" => param.kind,
            _ => "string",
        };
        let mut schema = json!({
            "type": kind,
            "description": param.description,
        });
        if kind == "array" {
            schema["items"] = json!({"type": "string"});
        }
        properties.insert(param.name.to_string(), schema);
        if param.required {
            required.push(Value::String(param.name.to_string()));
        }
    }
    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
    });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::context::ToolContext;
    use crate::tool::{ToolError, ToolInput};

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![
                ToolParameter::required("text", "string", "text to echo"),
                ToolParameter::optional("times", "number", "repeat count"),
            ]
        }
        async fn execute(
            &self,
            input: &ToolInput,
            _ctx: &ToolContext,
        ) -> Result<String, ToolError> {
            Ok(format!("echo:{}", input.raw))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "Echo" });
        assert!(reg.resolve("echo").is_some());
        assert!(reg.resolve("ECHO").is_some());
        assert!(reg.resolve("banana").is_none());
    }

    #[test]
    fn names_are_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zeta" });
        reg.register(EchoTool { name: "alpha" });
        assert_eq!(reg.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }

    #[test]
    fn schemas_include_required_and_optional_params() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 1);
        let params = &schemas[0].parameters;
        assert_eq!(params["type"], "object");
        assert_eq!(params["properties"]["text"]["type"], "string");
        assert_eq!(params["properties"]["times"]["type"], "number");
        let required = params["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "text");
        assert_eq!(params["additionalProperties"], false);
    }

    #[test]
    fn parameters_schema_unknown_kind_defaults_to_string() {
        let params = vec![ToolParameter::required("x", "integer-ish", "d")];
        let schema = parameters_schema(&params);
        assert_eq!(schema["properties"]["x"]["type"], "string");
    }

    #[test]
    fn parameters_schema_array_gets_items() {
        let params = vec![ToolParameter::optional("list", "array", "d")];
        let schema = parameters_schema(&params);
        assert_eq!(schema["properties"]["list"]["items"]["type"], "string");
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn descriptions_pair_names_with_text() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let descriptions = reg.descriptions();
        assert_eq!(descriptions[0].0, "echo");
        assert_eq!(descriptions[0].1, "echoes its input");
    }
}
