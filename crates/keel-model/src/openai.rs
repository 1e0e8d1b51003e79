// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::client::{ModelClient, ResponseStream, RetryPolicy};
use crate::{CompletionRequest, Message, MessageContent, ModelProfile, ResponseEvent, Role};

/// Driver for OpenAI-compatible chat-completions endpoints.
///
/// Handles both hosted services and local gateways that speak the same wire
/// format.  Retries 5xx responses with exponential backoff before the stream
/// starts; once streaming, errors surface as a single `Err` item.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    label: String,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

impl OpenAiChatClient {
    pub fn new(profile: &ModelProfile, timeout: Duration, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        let base_url = profile
            .base_url
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        Self {
            http,
            label: profile.name.clone(),
            model: profile.model.clone(),
            api_key: profile.api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            retry,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn payload(&self, req: &CompletionRequest) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": wire_messages(&req.messages),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
        });
        if !req.tools.is_empty() {
            payload["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if req.stream {
            payload["stream"] = Value::Bool(true);
        }
        payload
    }

    /// POST with the retry policy applied to 5xx responses.
    async fn post_with_retry(&self, payload: &Value) -> anyhow::Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let mut builder = self
                .http
                .post(self.chat_url())
                .header("Content-Type", "application/json");
            if !self.api_key.is_empty() {
                builder = builder.bearer_auth(&self.api_key);
            }
            let response = builder
                .json(payload)
                .send()
                .await
                .context("model request failed")?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if self.retry.should_retry(status.as_u16()) && attempt < self.retry.max_retries {
                let delay = self.retry.delay(attempt);
                warn!(
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "model returned server error; retrying"
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("model error {status}: {body}");
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiChatClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let mut req = req;
        req.stream = true;
        let payload = self.payload(&req);
        let response = self.post_with_retry(&payload).await?;

        let (tx, rx) = mpsc::channel::<anyhow::Result<ResponseEvent>>(64);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut saw_done = false;
            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(anyhow::anyhow!("stream read error: {e}"))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                // SSE frames are newline-separated; a partial line stays in
                // the buffer until the next chunk completes it.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        saw_done = true;
                        let _ = tx.send(Ok(ResponseEvent::Done)).await;
                        return;
                    }
                    for event in parse_stream_chunk(data) {
                        if tx.send(Ok(event)).await.is_err() {
                            // Receiver dropped — the turn was cancelled.
                            return;
                        }
                    }
                }
            }
            if !saw_done {
                let _ = tx.send(Ok(ResponseEvent::Done)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn complete_text(&self, req: CompletionRequest) -> anyhow::Result<String> {
        let mut req = req;
        req.stream = false;
        let payload = self.payload(&req);
        debug!(model = %self.model, "non-streaming completion");
        let response = self.post_with_retry(&payload).await?;
        let body: Value = response.json().await.context("parsing model response")?;
        Ok(extract_chat_text(&body))
    }
}

/// Parse one SSE `data:` JSON chunk into zero or more response events.
fn parse_stream_chunk(data: &str) -> Vec<ResponseEvent> {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return vec![];
    };
    let mut events = Vec::new();
    let delta = &value["choices"][0]["delta"];

    // Reasoning models expose their thinking under either key depending on
    // the serving layer.
    for key in ["reasoning_content", "reasoning"] {
        if let Some(text) = delta[key].as_str() {
            if !text.is_empty() {
                events.push(ResponseEvent::ReasoningDelta(text.to_string()));
            }
        }
    }
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            events.push(ResponseEvent::TextDelta(text.to_string()));
        }
    }
    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            let index = call["index"].as_u64().unwrap_or(0) as u32;
            events.push(ResponseEvent::ToolCallDelta {
                index,
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                arguments: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }
    events
}

/// Extract assistant text from a non-streaming chat-completions body.
fn extract_chat_text(body: &Value) -> String {
    body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Serialize history messages into the chat-completions wire format.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::Text(text) => json!({
                "role": role_str(m.role),
                "content": text,
            }),
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "arguments": function.arguments,
                    }
                }]
            }),
            MessageContent::ToolResult {
                tool_call_id,
                name,
                content,
            } => json!({
                "role": "tool",
                "content": content,
                "tool_call_id": tool_call_id,
                "name": name,
            }),
        })
        .collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Wire serialization ───────────────────────────────────────────────────

    #[test]
    fn wire_text_messages_carry_role_and_content() {
        let msgs = vec![Message::system("sys"), Message::user("hi")];
        let wire = wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "sys");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn wire_tool_call_has_function_envelope() {
        let msgs = vec![Message::tool_call("c1", "calc", "{\"x\":1}")];
        let wire = wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "c1");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "calc");
    }

    #[test]
    fn wire_tool_result_links_call_id() {
        let msgs = vec![Message::tool_result("c1", "calc", "4")];
        let wire = wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "c1");
        assert_eq!(wire[0]["content"], "4");
    }

    // ── Stream chunk parsing ─────────────────────────────────────────────────

    #[test]
    fn parse_chunk_content_delta() {
        let events =
            parse_stream_chunk(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert_eq!(events, vec![ResponseEvent::TextDelta("hel".into())]);
    }

    #[test]
    fn parse_chunk_reasoning_delta() {
        let events =
            parse_stream_chunk(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#);
        assert_eq!(events, vec![ResponseEvent::ReasoningDelta("hmm".into())]);
    }

    #[test]
    fn parse_chunk_tool_call_delta_accumulates_by_index() {
        let events = parse_stream_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"calc","arguments":"2+"}}]}}]}"#,
        );
        match &events[0] {
            ResponseEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(*index, 0);
                assert_eq!(id, "c1");
                assert_eq!(name, "calc");
                assert_eq!(arguments, "2+");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_chunk_ignores_empty_and_invalid() {
        assert!(parse_stream_chunk("not json").is_empty());
        assert!(parse_stream_chunk(r#"{"choices":[{"delta":{}}]}"#).is_empty());
        assert!(parse_stream_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).is_empty());
    }

    // ── Response extraction ──────────────────────────────────────────────────

    #[test]
    fn extract_chat_text_reads_message_content() {
        let body: Value = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hi."}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_chat_text(&body), "Hi.");
    }

    #[test]
    fn extract_chat_text_empty_for_malformed() {
        assert_eq!(extract_chat_text(&json!({})), "");
    }

    // ── Payload construction ─────────────────────────────────────────────────

    #[test]
    fn payload_includes_tools_when_present() {
        let profile = ModelProfile {
            model: "gpt-4o".into(),
            ..ModelProfile::default()
        };
        let client =
            OpenAiChatClient::new(&profile, Duration::from_secs(30), RetryPolicy::default());
        let req = CompletionRequest {
            messages: vec![Message::user("q")],
            tools: vec![crate::ToolSchema {
                name: "calc".into(),
                description: "math".into(),
                parameters: json!({"type":"object"}),
            }],
            stream: true,
            ..Default::default()
        };
        let payload = client.payload(&req);
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["tools"][0]["function"]["name"], "calc");
    }

    #[test]
    fn payload_omits_tools_when_empty() {
        let profile = ModelProfile::default();
        let client =
            OpenAiChatClient::new(&profile, Duration::from_secs(30), RetryPolicy::default());
        let req = CompletionRequest {
            messages: vec![Message::user("q")],
            ..Default::default()
        };
        assert!(client.payload(&req).get("tools").is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let profile = ModelProfile {
            base_url: Some("http://localhost:1234/v1/".into()),
            ..ModelProfile::default()
        };
        let client =
            OpenAiChatClient::new(&profile, Duration::from_secs(30), RetryPolicy::default());
        assert_eq!(client.chat_url(), "http://localhost:1234/v1/chat/completions");
    }
}
