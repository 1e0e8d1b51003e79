// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use keel_model::{Message, ToolSchema};

/// Deliberately coarse token estimate for a text: `ceil(ascii/4)` plus one
/// token per non-ASCII character.
///
/// This estimator is the sole arbiter for triggering compression, so it must
/// be deterministic and cheap — no tokenizer dependency, no model specifics.
pub fn estimate_tokens_for_text(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut ascii = 0usize;
    let mut non_ascii = 0usize;
    for ch in text.chars() {
        if ch.is_ascii() {
            ascii += 1;
        } else {
            non_ascii += 1;
        }
    }
    ascii.div_ceil(4) + non_ascii
}

/// Per-message framing overhead plus content estimate.
pub fn estimate_tokens_for_messages(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| 4 + estimate_tokens_for_text(&m.payload_text()))
        .sum()
}

/// Additive estimate for the tool-definitions payload, serialized once.
pub fn estimate_tokens_for_tools(tools: &[ToolSchema]) -> usize {
    if tools.is_empty() {
        return 0;
    }
    serde_json::to_string(tools)
        .map(|s| estimate_tokens_for_text(&s))
        .unwrap_or(0)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
