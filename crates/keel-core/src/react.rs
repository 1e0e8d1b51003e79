// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use futures::StreamExt;
use regex::Regex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use keel_model::{CompletionRequest, Message, ModelClient, ResponseEvent};
use keel_tools::{DispatchResult, ToolContext, ToolDispatcher};

use crate::events::{AgentStep, StepKind};
use crate::stop::StopSignal;

/// Observer for model invocations made by the loop; the runtime installs one
/// that persists LLM-call rows.
pub type CallRecorder = Arc<dyn Fn(u32, &CompletionRequest, &str) + Send + Sync>;

/// Inputs for one run of the reason-act-observe loop.
pub struct ReactRun {
    pub user_input: String,
    /// Prior history as assembled by the context builder.
    pub history: Vec<Message>,
    /// Base system prompt; tool list and scratchpad are appended per
    /// iteration.
    pub base_prompt: String,
    pub model: Arc<dyn ModelClient>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub tool_ctx: ToolContext,
    pub stop: Arc<StopSignal>,
    /// Supply JSON-schema tool definitions so the model can emit native
    /// tool calls in addition to the plain-text protocol.
    pub native_tools: bool,
    pub call_recorder: Option<CallRecorder>,
}

/// Finite-iteration state machine over (model call → emit → tool step).
///
/// Yields a strictly ordered sequence of [`AgentStep`]s through the provided
/// channel.  The loop ends at a final answer, a fatal model error, the stop
/// signal, or the iteration bound (which produces a synthetic answer).
pub struct ReactAgent {
    pub max_iterations: u32,
}

/// Parsed plain-text reply markers.
#[derive(Debug, Default, PartialEq)]
struct Parsed {
    thought: Option<String>,
    action: Option<String>,
    action_input: Option<String>,
    final_answer: Option<String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ReactAgent {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    pub async fn run(&self, run: ReactRun, tx: mpsc::Sender<AgentStep>) -> anyhow::Result<()> {
        let mut scratchpad: Vec<String> = Vec::new();

        for iteration in 0..self.max_iterations {
            // The stop signal is edge-triggered: between iterations and at
            // every streaming chunk.
            if run.stop.is_set() {
                return Ok(());
            }

            let request = self.build_request(&run, &scratchpad);
            let mut stream = match run.model.stream(request.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    // Model invocation failure is fatal for the turn.
                    let step = AgentStep::new(StepKind::Error, format!("LLM call failed: {e}"))
                        .with_metadata(json!({"iteration": iteration}));
                    let _ = tx.send(step).await;
                    return Ok(());
                }
            };

            let mut full_text = String::new();
            // Reasoning deltas are forwarded as they arrive and accumulated
            // here; the completed block is emitted as one persisted
            // `reasoning` step when the model moves on to its reply.
            let mut reasoning_buf = String::new();
            let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
            let mut stopped = false;
            let mut stream_failed = false;
            loop {
                tokio::select! {
                    biased;
                    _ = run.stop.cancelled() => {
                        // Abort the read without waiting for `done`; deltas
                        // received so far have already been forwarded.
                        stopped = true;
                        break;
                    }
                    event = stream.next() => {
                        match event {
                            None => break,
                            Some(Err(e)) => {
                                let step = AgentStep::new(
                                    StepKind::Error,
                                    format!("LLM call failed: {e}"),
                                )
                                .with_metadata(json!({"iteration": iteration}));
                                let _ = tx.send(step).await;
                                stream_failed = true;
                                break;
                            }
                            Some(Ok(ResponseEvent::TextDelta(delta))) => {
                                if !reasoning_buf.is_empty() {
                                    let block = std::mem::take(&mut reasoning_buf);
                                    let step = AgentStep::new(StepKind::Reasoning, block)
                                        .with_metadata(json!({"iteration": iteration}));
                                    if tx.send(step).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                full_text.push_str(&delta);
                                let step = AgentStep::new(StepKind::ContentDelta, delta)
                                    .with_metadata(json!({"iteration": iteration}));
                                if tx.send(step).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Some(Ok(ResponseEvent::ReasoningDelta(delta))) => {
                                reasoning_buf.push_str(&delta);
                                let step = AgentStep::new(StepKind::ReasoningDelta, delta)
                                    .with_metadata(json!({"iteration": iteration}));
                                if tx.send(step).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Some(Ok(ResponseEvent::ToolCallDelta { index, id, name, arguments })) => {
                                let entry = pending.entry(index).or_default();
                                if !id.is_empty() {
                                    entry.id = id.clone();
                                }
                                if !name.is_empty() {
                                    entry.name = name.clone();
                                }
                                entry.arguments.push_str(&arguments);
                                let step = AgentStep::new(StepKind::ToolCallDelta, arguments)
                                    .with_metadata(json!({
                                        "index": index,
                                        "id": id,
                                        "tool": name,
                                        "iteration": iteration,
                                    }));
                                if tx.send(step).await.is_err() {
                                    return Ok(());
                                }
                            }
                            Some(Ok(ResponseEvent::Done)) => break,
                            Some(Ok(ResponseEvent::Error(msg))) => {
                                warn!("model stream warning: {msg}");
                            }
                        }
                    }
                }
            }
            if stopped {
                return Ok(());
            }
            if stream_failed {
                return Ok(());
            }

            // A turn can end while still "thinking" (reasoning-only reply).
            if !reasoning_buf.is_empty() {
                let step = AgentStep::new(StepKind::Reasoning, reasoning_buf)
                    .with_metadata(json!({"iteration": iteration}));
                if tx.send(step).await.is_err() {
                    return Ok(());
                }
            }

            if let Some(recorder) = &run.call_recorder {
                recorder(iteration, &request, &full_text);
            }

            // Native tool calls bypass text parsing; calls without a name
            // cannot be dispatched and are dropped.
            let native_calls: Vec<(String, String)> = pending
                .into_values()
                .filter(|call| !call.name.is_empty())
                .map(|call| (call.name, call.arguments))
                .collect();

            let parsed = parse_reaction(&full_text);

            // A final answer always wins, even when an action is present too.
            if let Some(answer) = parsed.final_answer {
                let step = AgentStep::new(StepKind::Answer, answer).with_metadata(json!({
                    "iterations": iteration + 1,
                    "scratchpad_len": scratchpad.len(),
                }));
                let _ = tx.send(step).await;
                return Ok(());
            }

            if let Some(thought) = &parsed.thought {
                let step = AgentStep::new(StepKind::Thought, thought.clone())
                    .with_metadata(json!({"iteration": iteration}));
                if tx.send(step).await.is_err() {
                    return Ok(());
                }
                scratchpad.push(format!("Thought: {thought}"));
            }

            let actions: Vec<(String, String)> = if !native_calls.is_empty() {
                native_calls
            } else {
                match (&parsed.action, &parsed.action_input) {
                    (Some(action), Some(input)) if !input.is_empty() => {
                        vec![(action.clone(), input.clone())]
                    }
                    _ => Vec::new(),
                }
            };

            if actions.is_empty() {
                if parsed.thought.is_none() && parsed.action.is_none() && !full_text.is_empty() {
                    // Plain reply with no protocol markers: the text is the
                    // answer.
                    let step = AgentStep::new(StepKind::Answer, full_text).with_metadata(json!({
                        "iterations": iteration + 1,
                        "scratchpad_len": scratchpad.len(),
                    }));
                    let _ = tx.send(step).await;
                    return Ok(());
                }
                // The model named a tool without input, or produced only a
                // thought — note it and let the next iteration recover.
                let step = AgentStep::new(StepKind::Thought, "(no action determined)")
                    .with_metadata(json!({"iteration": iteration, "warning": "no_action"}));
                if tx.send(step).await.is_err() {
                    return Ok(());
                }
                continue;
            }

            for (tool_name, tool_input) in actions {
                let action_step = AgentStep::new(
                    StepKind::Action,
                    format!("{tool_name}[{tool_input}]"),
                )
                .with_metadata(json!({
                    "tool": tool_name,
                    "input": tool_input,
                    "iteration": iteration,
                }));
                if tx.send(action_step).await.is_err() {
                    return Ok(());
                }
                scratchpad.push(format!("Action: {tool_name}\nAction Input: {tool_input}"));

                let result = run
                    .dispatcher
                    .dispatch(&tool_name, &tool_input, &run.tool_ctx)
                    .await;
                debug!(tool = %tool_name, ok = result.is_ok(), "tool dispatched");

                match &result {
                    DispatchResult::NotFound(name) => {
                        let message = format!("tool not found: {name}");
                        let step = AgentStep::new(StepKind::Error, message.clone())
                            .with_metadata(json!({"tool": tool_name, "iteration": iteration}));
                        if tx.send(step).await.is_err() {
                            return Ok(());
                        }
                        scratchpad.push(format!("Observation: {message}"));
                    }
                    other => {
                        let text = other.observation_text();
                        let mut metadata = json!({"tool": tool_name, "iteration": iteration});
                        if !other.is_ok() {
                            metadata["error"] = json!(true);
                        }
                        let step = AgentStep::new(StepKind::Observation, text.clone())
                            .with_metadata(metadata);
                        if tx.send(step).await.is_err() {
                            return Ok(());
                        }
                        scratchpad.push(format!("Observation: {text}"));
                    }
                }

                if run.stop.is_set() {
                    return Ok(());
                }
            }
        }

        // Iteration budget exhausted without a final answer.
        let step = AgentStep::new(
            StepKind::Answer,
            "I could not finish within the allowed number of steps. \
             Try rephrasing the request or breaking it into smaller pieces.",
        )
        .with_metadata(json!({
            "iterations": self.max_iterations,
            "max_iterations_reached": true,
        }));
        let _ = tx.send(step).await;
        Ok(())
    }

    /// Re-rendered every iteration because the scratchpad grows.
    fn build_request(&self, run: &ReactRun, scratchpad: &[String]) -> CompletionRequest {
        let tool_lines: Vec<String> = run
            .dispatcher
            .registry()
            .descriptions()
            .into_iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect();
        let system = render_system_prompt(&run.base_prompt, &tool_lines, scratchpad);

        let mut messages = Vec::with_capacity(run.history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(run.history.iter().cloned());
        messages.push(Message::user(&run.user_input));

        let tools = if run.native_tools {
            run.dispatcher
                .registry()
                .schemas()
                .into_iter()
                .map(|s| keel_model::ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };

        CompletionRequest {
            messages,
            tools,
            stream: true,
            ..Default::default()
        }
    }
}

fn render_system_prompt(base: &str, tool_lines: &[String], scratchpad: &[String]) -> String {
    let tools_block = if tool_lines.is_empty() {
        "(no tools available)".to_string()
    } else {
        tool_lines.join("\n")
    };
    let scratchpad_block = if scratchpad.is_empty() {
        "(this is the first step)".to_string()
    } else {
        scratchpad.join("\n")
    };
    format!(
        "{base}\n\n\
         You can solve problems by reasoning and acting in steps.\n\n\
         Available tools:\n{tools_block}\n\n\
         Answer using exactly this format:\n\n\
         Thought: your reasoning about the problem\n\
         Action: tool name\n\
         Action Input: input for the tool\n\
         Observation: result returned by the tool\n\n\
         (repeat the steps above until you know the answer)\n\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer\n\n\
         Rules:\n\
         1. Use one tool at a time.\n\
         2. Action must be one of the tools listed above.\n\
         3. Keep Action Input short and precise.\n\n\
         Previous reasoning:\n{scratchpad_block}\n\n\
         Begin! Follow the format exactly."
    )
}

/// Extract `Thought:` / `Action:` / `Action Input:` / `Final Answer:` blocks.
/// Matching is case-insensitive and non-greedy; each block ends at the next
/// section header or end of text.
fn parse_reaction(text: &str) -> Parsed {
    static THOUGHT: OnceLock<Regex> = OnceLock::new();
    static ACTION: OnceLock<Regex> = OnceLock::new();
    static ACTION_INPUT: OnceLock<Regex> = OnceLock::new();
    static FINAL_ANSWER: OnceLock<Regex> = OnceLock::new();

    // The block body is matched lazily with an optional next-header tail —
    // the supported way to say "up to the next section header or end of
    // text" without lookahead.
    let thought_re = THOUGHT.get_or_init(|| {
        Regex::new(r"(?is)\bthought\s*:\s*(.*?)\s*(?:\n\s*(?:action|final\s+answer)\s*:.*)?\z")
            .expect("regex")
    });
    let action_re =
        ACTION.get_or_init(|| Regex::new(r"(?i)\baction\s*:\s*(\w+)").expect("regex"));
    let input_re = ACTION_INPUT.get_or_init(|| {
        Regex::new(r"(?is)\baction\s+input\s*:\s*(.*?)\s*(?:\n\s*observation\s*:.*)?\z")
            .expect("regex")
    });
    let answer_re = FINAL_ANSWER
        .get_or_init(|| Regex::new(r"(?is)\bfinal\s+answer\s*:\s*(.*)\z").expect("regex"));

    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    Parsed {
        thought: capture(thought_re),
        action: capture(action_re),
        action_input: capture(input_re),
        final_answer: capture(answer_re),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
