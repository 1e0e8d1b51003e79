// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod annotate;
mod context;
mod estimate;
mod events;
mod react;
mod runtime;
mod stop;

pub use annotate::{ContextAnnotator, NoopAnnotator};
pub use context::{
    build_history, maybe_compress, truncate_middle, CompressionOutcome, CompressorInputs,
    TruncationConfig, CONTEXT_SUMMARY_MARKER, TRUNCATION_MARKER_END, TRUNCATION_MARKER_START,
};
pub use estimate::{
    estimate_tokens_for_messages, estimate_tokens_for_text, estimate_tokens_for_tools,
};
pub use events::{AgentStep, StepKind};
pub use react::{CallRecorder, ReactAgent, ReactRun};
pub use runtime::{
    preprocess_user_text, AttachmentInput, RollbackReport, SessionRuntime, TurnEvent, TurnRequest,
};
pub use stop::{StopRegistry, StopSignal};
