// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod mock;
mod openai;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;

pub use client::{ModelClient, ResponseStream, RetryPolicy};
pub use mock::ScriptedMockClient;
pub use openai::OpenAiChatClient;
pub use types::*;

/// Construct a shared [`ModelClient`] from a stored model profile.
///
/// The wire format tag selects the driver; `"mock"` produces a scripted mock
/// with a single canned reply, which keeps end-to-end tests and offline demos
/// working without network access.
pub fn from_profile(
    profile: &ModelProfile,
    llm: &keel_config::LlmConfig,
) -> anyhow::Result<Arc<dyn ModelClient>> {
    let timeout = Duration::from_secs_f64(llm.timeout_sec.max(1.0));
    let retry = RetryPolicy::from_config(&llm.retry);
    match profile.api_format.as_str() {
        "openai_chat" | "openai" | "" => {
            Ok(Arc::new(OpenAiChatClient::new(profile, timeout, retry)))
        }
        "mock" => Ok(Arc::new(ScriptedMockClient::always_text("mock reply"))),
        other => bail!("unknown api format: {other:?} (expected openai_chat or mock)"),
    }
}
