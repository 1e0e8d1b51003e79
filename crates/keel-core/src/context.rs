// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use keel_config::ContextConfig;
use keel_model::{CompletionRequest, Message, ModelClient};
use keel_store::{MessageRow, Store};

use crate::estimate::{estimate_tokens_for_messages, estimate_tokens_for_text};

pub const CONTEXT_SUMMARY_MARKER: &str = "[Context Summary]";
pub const TRUNCATION_MARKER_START: &str = "[TRUNCATED_START]";
pub const TRUNCATION_MARKER_END: &str = "[TRUNCATED_END]";

/// Summarization is auxiliary: it gets a deadline well under the model-call
/// timeout and may never block the main turn.
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a dialogue summarization assistant. Compress the conversation into a \
concise summary that allows the dialogue to continue later.\n\
- Summarize only the exchange between the user and the assistant\n\
- Preserve key goals, conclusions, facts, constraints, open items, and \
code/file/command references\n\
- Do not include system prompts or tool-call transcripts\n\
- Output the bare summary text, no heading or preamble";

// ─── Middle truncation ────────────────────────────────────────────────────────

/// Middle-truncation policy for large tool arguments and outputs.
#[derive(Debug, Clone)]
pub struct TruncationConfig {
    pub enabled: bool,
    pub threshold: usize,
    pub head_chars: usize,
    pub tail_chars: usize,
}

impl From<&ContextConfig> for TruncationConfig {
    fn from(cfg: &ContextConfig) -> Self {
        Self {
            enabled: cfg.truncate_long_data,
            threshold: cfg.long_data_threshold,
            head_chars: cfg.long_data_head_chars,
            tail_chars: cfg.long_data_tail_chars,
        }
    }
}

/// Keep the head and tail of an oversized text, interpolating a marker that
/// records the omitted character count.  A pure function of the config:
/// identity when disabled, under the threshold, or when head + tail would
/// cover the whole text anyway.
pub fn truncate_middle(text: &str, cfg: &TruncationConfig) -> String {
    if !cfg.enabled || cfg.threshold == 0 {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= cfg.threshold {
        return text.to_string();
    }
    if cfg.head_chars + cfg.tail_chars >= chars.len() {
        return text.to_string();
    }
    let omitted = chars.len() - cfg.head_chars - cfg.tail_chars;
    let head: String = chars[..cfg.head_chars].iter().collect();
    let tail: String = chars[chars.len() - cfg.tail_chars..].iter().collect();
    format!(
        "{head}\n{TRUNCATION_MARKER_START}({omitted} chars omitted)\n{TRUNCATION_MARKER_END}\n{tail}"
    )
}

// ─── History assembly ─────────────────────────────────────────────────────────

/// Reconstruct the model-facing message array from the repository.
///
/// Starting after the compression boundary, each assistant message's
/// persisted tool steps are interleaved as tool-call / tool-result message
/// pairs, correlated by a synthetic id.  An observation without a matching
/// prior action gets a fabricated call with empty arguments so the pairing
/// stays well-formed.  The running summary (and an optional code-map
/// annotation) are prepended as pseudo-assistant messages.
pub fn build_history(
    store: &Store,
    session_id: &str,
    after_message_id: Option<i64>,
    current_user_message_id: Option<i64>,
    summary: &str,
    code_map: Option<&str>,
    trunc: &TruncationConfig,
) -> anyhow::Result<Vec<Message>> {
    let rows = store.dialogue_messages_after(session_id, after_message_id)?;
    let filtered: Vec<MessageRow> = rows
        .into_iter()
        .filter(|m| Some(m.id) != current_user_message_id)
        // In-flight (or failed) assistant rows have no content yet and would
        // only confuse the model.
        .filter(|m| !(m.role == "assistant" && m.content.trim().is_empty()))
        .collect();

    let assistant_ids: Vec<i64> = filtered
        .iter()
        .filter(|m| m.role == "assistant")
        .map(|m| m.id)
        .collect();
    let mut steps_by_message: HashMap<i64, Vec<keel_store::StepRow>> = HashMap::new();
    for step in store.agent_steps_for_messages(&assistant_ids)? {
        steps_by_message.entry(step.message_id).or_default().push(step);
    }

    let mut history: Vec<Message> = Vec::new();
    let mut call_counter = 0usize;
    for row in &filtered {
        if row.role == "assistant" {
            let mut pending: Vec<(String, String)> = Vec::new();
            for step in steps_by_message.get(&row.id).map(Vec::as_slice).unwrap_or(&[]) {
                let Some(tool) = step.metadata.get("tool").and_then(|v| v.as_str()) else {
                    continue;
                };
                match step.step_type.as_str() {
                    "action" => {
                        let input = step
                            .metadata
                            .get("input")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        let input = truncate_middle(input, trunc);
                        call_counter += 1;
                        let call_id =
                            format!("hist_call_{}_{}_{}", row.id, step.sequence, call_counter);
                        pending.push((tool.to_string(), call_id.clone()));
                        history.push(Message::tool_call(call_id, tool, input));
                    }
                    "observation" => {
                        // Compression bookkeeping observations are internal.
                        if step.metadata.get("context_compress").and_then(|v| v.as_bool())
                            == Some(true)
                        {
                            continue;
                        }
                        let output = truncate_middle(&step.content, trunc);
                        let call_id = match pending.iter().position(|(t, _)| t == tool) {
                            Some(idx) => pending.remove(idx).1,
                            None => {
                                call_counter += 1;
                                let id = format!(
                                    "hist_call_{}_{}_{}",
                                    row.id, step.sequence, call_counter
                                );
                                history.push(Message::tool_call(id.clone(), tool, ""));
                                id
                            }
                        };
                        history.push(Message::tool_result(call_id, tool, output));
                    }
                    _ => {}
                }
            }
        }
        history.push(match row.role.as_str() {
            "user" => Message::user(&row.content),
            "system" => Message::system(&row.content),
            _ => Message::assistant(&row.content),
        });
    }

    if !summary.is_empty() {
        history.insert(
            0,
            Message::assistant(format!("{CONTEXT_SUMMARY_MARKER}\n{summary}")),
        );
    }
    if let Some(map) = code_map {
        let index = if summary.is_empty() { 0 } else { 1 };
        history.insert(index, Message::assistant(map));
    }
    Ok(history)
}

// ─── Compression ──────────────────────────────────────────────────────────────

/// Result of a compression attempt.  Callers persist the summary and
/// boundary on the owning session only when `did_compress` is true.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub summary: String,
    pub boundary_call_id: i64,
    pub boundary_message_id: Option<i64>,
    pub did_compress: bool,
}

pub struct CompressorInputs<'a> {
    pub session_id: &'a str,
    pub max_context_tokens: usize,
    pub current_summary: &'a str,
    pub last_compressed_call_id: i64,
    pub current_user_message_id: Option<i64>,
    pub current_user_text: &'a str,
}

fn estimate_history(
    store: &Store,
    session_id: &str,
    after_message_id: Option<i64>,
    current_user_message_id: Option<i64>,
    summary: &str,
    trunc: &TruncationConfig,
    current_user_text: &str,
) -> anyhow::Result<usize> {
    let history = build_history(
        store,
        session_id,
        after_message_id,
        current_user_message_id,
        summary,
        None,
        trunc,
    )?;
    Ok(estimate_tokens_for_messages(&history) + estimate_tokens_for_text(current_user_text))
}

/// Enforce the token budget by folding old dialogue into the running summary.
///
/// Triggered only at `compress_start_pct` of the window; each round picks the
/// latest compressible model call outside the protected window as the new
/// boundary, summarizes the dialogue up to it, and repeats with a smaller
/// protected window until the estimate drops below `compress_target_pct` or
/// no further boundary exists.  Every round either strictly advances the
/// boundary or exits — a candidate at or before the current boundary
/// terminates the loop instead of re-entering the shrink spin.
pub async fn maybe_compress(
    store: &Store,
    cfg: &ContextConfig,
    summarizer: Arc<dyn ModelClient>,
    inputs: CompressorInputs<'_>,
) -> anyhow::Result<CompressionOutcome> {
    let original = CompressionOutcome {
        summary: inputs.current_summary.to_string(),
        boundary_call_id: inputs.last_compressed_call_id,
        boundary_message_id: None,
        did_compress: false,
    };
    if !cfg.compression_enabled
        || inputs.max_context_tokens == 0
        || inputs.current_user_message_id.is_none()
    {
        return Ok(original);
    }

    let trunc = TruncationConfig::from(cfg);
    let mut summary = inputs.current_summary.to_string();
    let mut last_call_id = inputs.last_compressed_call_id.max(0);
    let mut last_message_id: Option<i64> = if last_call_id > 0 {
        store.message_id_for_llm_call(inputs.session_id, last_call_id)?
    } else {
        None
    };

    let start_threshold = cfg.compress_start_pct as f64 / 100.0 * inputs.max_context_tokens as f64;
    let target_threshold =
        cfg.compress_target_pct as f64 / 100.0 * inputs.max_context_tokens as f64;

    let initial = estimate_history(
        store,
        inputs.session_id,
        last_message_id,
        inputs.current_user_message_id,
        &summary,
        &trunc,
        inputs.current_user_text,
    )?;
    if (initial as f64) < start_threshold {
        debug!(initial, "compression skipped: below start threshold");
        return Ok(CompressionOutcome {
            boundary_message_id: last_message_id,
            ..original
        });
    }

    let step_calls = cfg.step_calls.max(1);
    let mut keep_window = cfg.keep_recent_calls;
    let mut did_compress = false;

    loop {
        let calls_after = store.llm_call_metas_after(inputs.session_id, last_call_id)?;
        if calls_after.len() <= keep_window {
            break;
        }
        let split = calls_after.len() - keep_window;
        let (compressible, protected) = calls_after.split_at(split);
        let protected_message_ids: HashSet<i64> =
            protected.iter().filter_map(|c| c.message_id).collect();

        let boundary = compressible.iter().rev().find(|c| {
            c.message_id
                .map(|m| !protected_message_ids.contains(&m))
                .unwrap_or(false)
        });
        let Some(boundary) = boundary else {
            // No usable boundary at this window size: shrink and retry, down
            // to a window of zero.
            if keep_window == 0 {
                break;
            }
            keep_window = if keep_window > 1 {
                keep_window.saturating_sub(step_calls).max(1)
            } else {
                0
            };
            continue;
        };
        let boundary_call_id = boundary.id;
        if boundary_call_id <= last_call_id {
            // Strict-advance invariant: never revisit an already-compressed
            // region.
            break;
        }
        let Some(boundary_message_id) =
            store.message_id_for_llm_call(inputs.session_id, boundary_call_id)?
        else {
            break;
        };

        let messages_between = store.dialogue_messages_between(
            inputs.session_id,
            last_message_id.unwrap_or(0) + 1,
            boundary_message_id,
        )?;
        if messages_between.is_empty() {
            break;
        }

        // Only whole user→assistant pairs fully inside the compressible set
        // are folded into the summary.
        let compressible_assistant_ids: HashSet<i64> = compressible
            .iter()
            .filter(|c| c.id <= boundary_call_id)
            .filter_map(|c| c.message_id)
            .filter(|m| !protected_message_ids.contains(m))
            .collect();
        if compressible_assistant_ids.is_empty() {
            break;
        }

        let id_to_index: HashMap<i64, usize> = messages_between
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.id, idx))
            .collect();
        let mut compress_ids: HashSet<i64> = HashSet::new();
        for assistant_id in &compressible_assistant_ids {
            let Some(&idx) = id_to_index.get(assistant_id) else {
                continue;
            };
            compress_ids.insert(*assistant_id);
            for back in (0..idx).rev() {
                if messages_between[back].role == "user" {
                    compress_ids.insert(messages_between[back].id);
                    break;
                }
            }
        }
        if let Some(current) = inputs.current_user_message_id {
            compress_ids.remove(&current);
        }
        if compress_ids.is_empty() {
            break;
        }
        let compress_messages: Vec<&MessageRow> = messages_between
            .iter()
            .filter(|m| compress_ids.contains(&m.id))
            .collect();
        if compress_messages.is_empty() {
            break;
        }

        // Floor on uncompressed messages.
        let remaining = store
            .dialogue_messages_after(inputs.session_id, Some(boundary_message_id))?
            .into_iter()
            .filter(|m| Some(m.id) != inputs.current_user_message_id)
            .filter(|m| !(m.role == "assistant" && m.content.trim().is_empty()))
            .count();
        if remaining < cfg.min_keep_messages {
            debug!(remaining, "compression stopped: min_keep_messages floor");
            break;
        }

        let Some(new_summary) =
            run_summary(summarizer.clone(), &summary, &compress_messages).await
        else {
            break;
        };

        summary = new_summary;
        last_call_id = boundary_call_id;
        last_message_id = Some(boundary_message_id);
        did_compress = true;

        let tokens = estimate_history(
            store,
            inputs.session_id,
            last_message_id,
            inputs.current_user_message_id,
            &summary,
            &trunc,
            inputs.current_user_text,
        )?;
        debug!(tokens, boundary_call_id, "compression round complete");
        if (tokens as f64) <= target_threshold {
            break;
        }
        if keep_window == 0 {
            break;
        }
        keep_window = keep_window.saturating_sub(step_calls);
    }

    if did_compress {
        Ok(CompressionOutcome {
            summary,
            boundary_call_id: last_call_id,
            boundary_message_id: last_message_id,
            did_compress: true,
        })
    } else {
        Ok(CompressionOutcome {
            boundary_message_id: last_message_id,
            ..original
        })
    }
}

/// One non-streaming summarization call.  Empty or failed output yields
/// `None` so the caller exits without advancing the boundary.
async fn run_summary(
    summarizer: Arc<dyn ModelClient>,
    prior_summary: &str,
    dialogue: &[&MessageRow],
) -> Option<String> {
    let dialogue_text = format_dialogue(dialogue);
    if dialogue_text.is_empty() && prior_summary.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    if !prior_summary.is_empty() {
        parts.push(format!("Existing summary:\n{prior_summary}"));
    }
    if !dialogue_text.is_empty() {
        parts.push(format!("New dialogue:\n{dialogue_text}"));
    }
    let user_prompt = format!(
        "{}\n\nProduce the updated summary. Output only the summary text.",
        parts.join("\n\n")
    );

    let request = CompletionRequest {
        messages: vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(user_prompt),
        ],
        stream: false,
        ..Default::default()
    };
    match tokio::time::timeout(SUMMARY_TIMEOUT, summarizer.complete_text(request)).await {
        Ok(Ok(text)) => {
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Ok(Err(e)) => {
            warn!("summary generation failed: {e}");
            None
        }
        Err(_) => {
            warn!("summary generation timed out");
            None
        }
    }
}

fn format_dialogue(messages: &[&MessageRow]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        let content = msg.content.trim();
        if content.is_empty() {
            continue;
        }
        let prefix = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            _ => continue,
        };
        lines.push(format!("{prefix}: {content}"));
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
