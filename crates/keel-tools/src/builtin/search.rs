// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tool::{Tool, ToolError, ToolInput, ToolParameter};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Web search backed by the Tavily API.
pub struct TavilySearchTool;

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web using Tavily."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", "string", "Search query."),
            ToolParameter::optional("max_results", "number", "Max results."),
        ]
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = input
            .str_arg_or_raw("query")
            .ok_or_else(|| ToolError::invalid("Missing query."))?;

        let search = &ctx.config.search;
        let api_key = if !search.tavily_api_key.is_empty() {
            search.tavily_api_key.clone()
        } else {
            std::env::var("TAVILY_API_KEY").unwrap_or_default()
        };
        if api_key.is_empty() {
            return Ok(
                "Tavily API key not configured. Set TAVILY_API_KEY or the search config.".into(),
            );
        }

        let max_results = input
            .u64_arg("max_results")
            .map(|v| v as usize)
            .unwrap_or(search.max_results);

        let payload = json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": search.search_depth,
            "include_answer": false,
            "include_raw_content": false,
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| ToolError::failed(format!("http client error: {e}")))?;
        let response = client
            .post(TAVILY_ENDPOINT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "search error: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::failed(format!("search response parse failed: {e}")))?;

        Ok(format_results(&body, search.min_score))
    }
}

/// Render Tavily's result array, dropping entries under the score floor.
fn format_results(body: &Value, min_score: f64) -> String {
    let results = body["results"].as_array().cloned().unwrap_or_default();
    let kept: Vec<&Value> = results
        .iter()
        .filter(|item| match item["score"].as_f64() {
            Some(score) => score >= min_score,
            None => true,
        })
        .collect();
    if kept.is_empty() {
        return "No results.".to_string();
    }

    let mut lines = vec!["Search results:".to_string()];
    for (idx, item) in kept.iter().enumerate() {
        let title = item["title"].as_str().unwrap_or_default();
        let url = item["url"].as_str().unwrap_or_default();
        let snippet = item["content"].as_str().unwrap_or_default();
        lines.push(format!("{}. {}", idx + 1, title));
        if !url.is_empty() {
            lines.push(url.to_string());
        }
        if !snippet.is_empty() {
            lines.push(snippet.to_string());
        }
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn body(results: Value) -> Value {
        json!({ "results": results })
    }

    #[test]
    fn formats_numbered_results_with_urls() {
        let text = format_results(
            &body(json!([
                {"title": "First", "url": "https://a", "content": "snippet a", "score": 0.9},
                {"title": "Second", "url": "https://b", "content": "snippet b", "score": 0.8},
            ])),
            0.4,
        );
        assert!(text.starts_with("Search results:"));
        assert!(text.contains("1. First"));
        assert!(text.contains("https://b"));
        assert!(text.contains("snippet b"));
    }

    #[test]
    fn low_scoring_results_are_dropped() {
        let text = format_results(
            &body(json!([
                {"title": "Good", "score": 0.9},
                {"title": "Bad", "score": 0.1},
            ])),
            0.4,
        );
        assert!(text.contains("Good"));
        assert!(!text.contains("Bad"));
    }

    #[test]
    fn unscored_results_are_kept() {
        let text = format_results(&body(json!([{"title": "NoScore"}])), 0.4);
        assert!(text.contains("NoScore"));
    }

    #[test]
    fn empty_results_say_no_results() {
        assert_eq!(format_results(&body(json!([])), 0.4), "No results.");
        assert_eq!(format_results(&json!({}), 0.4), "No results.");
    }

    #[tokio::test]
    async fn missing_api_key_returns_hint_not_error() {
        // Only run when the environment does not provide a key.
        if std::env::var("TAVILY_API_KEY").is_ok() {
            return;
        }
        let ctx = ToolContext::new(
            std::path::PathBuf::from("/w"),
            std::sync::Arc::new(keel_config::Config::default()),
        );
        let out = TavilySearchTool
            .execute(&ToolInput::parse("rust async", Some("query")), &ctx)
            .await
            .unwrap();
        assert!(out.contains("not configured"));
    }
}
