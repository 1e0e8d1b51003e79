// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::client::{ModelClient, ResponseStream};
use crate::{CompletionRequest, ResponseEvent};

/// A pre-scripted mock client.  Each call to `stream` pops the next response
/// script from the front of the queue.  This lets tests specify exact event
/// sequences – including tool-call deltas – without network access.
pub struct ScriptedMockClient {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    /// The last `CompletionRequest` seen by this client.
    /// Written on each call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
    /// Count of completed calls, for asserting iteration counts.
    pub calls: Arc<Mutex<usize>>,
}

impl ScriptedMockClient {
    /// Build a client from a list of response scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the event sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Convenience: client that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: one scripted call that streams `reply` in a few pieces.
    pub fn text_in_chunks(reply: &str, chunk_len: usize) -> Self {
        let mut events: Vec<ResponseEvent> = reply
            .as_bytes()
            .chunks(chunk_len.max(1))
            .map(|c| ResponseEvent::TextDelta(String::from_utf8_lossy(c).to_string()))
            .collect();
        events.push(ResponseEvent::Done);
        Self::new(vec![events])
    }

    /// Convenience: a reply that fails with a fatal stream error.
    pub fn always_failing(message: impl Into<String>) -> Self {
        let msg = message.into();
        let mut client = Self::new(vec![]);
        client.scripts = Arc::new(Mutex::new(vec![vec![ResponseEvent::Error(msg)]]));
        client
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        *self.calls.lock().unwrap() += 1;
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::Message;

    fn req(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user(text)],
            stream: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let c = ScriptedMockClient::always_text("hello world");
        let mut stream = c.stream(req("hi")).await.unwrap();
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hello world"));
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let c = ScriptedMockClient::always_text("x");
        let _ = c.stream(req("question")).await.unwrap();
        let last = c.last_request.lock().unwrap();
        assert_eq!(last.as_ref().unwrap().messages[0].as_text(), Some("question"));
    }

    #[tokio::test]
    async fn scripted_counts_calls_and_falls_back() {
        let c = ScriptedMockClient::new(vec![vec![ResponseEvent::Done]]);
        let _ = c.stream(req("a")).await.unwrap();
        let mut second = c.stream(req("b")).await.unwrap();
        let ev = second.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t.contains("no more scripts")));
        assert_eq!(*c.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn text_in_chunks_reassembles() {
        let c = ScriptedMockClient::text_in_chunks("Hello.", 2);
        let text = c.complete_text(req("q")).await.unwrap();
        assert_eq!(text, "Hello.");
    }

    #[tokio::test]
    async fn complete_text_default_impl_drains_stream() {
        let c = ScriptedMockClient::always_text("final");
        assert_eq!(c.complete_text(req("q")).await.unwrap(), "final");
    }
}
