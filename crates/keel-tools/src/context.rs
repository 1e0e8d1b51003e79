// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use keel_config::{AgentMode, Config};

/// Per-invocation context bag threaded through every tool call.
///
/// Carries the policy inputs (work path, mode, unrestricted flag) and a
/// consistent config snapshot.  Passed explicitly — there is no ambient
/// global for tools to reach into.
#[derive(Clone)]
pub struct ToolContext {
    pub work_path: PathBuf,
    pub agent_mode: AgentMode,
    pub shell_unrestricted: bool,
    pub session_id: Option<String>,
    /// Set by the dispatcher after an out-of-band approval: the execution
    /// that follows skips the gate that was just approved.
    pub gate_approved: bool,
    pub config: Arc<Config>,
}

impl ToolContext {
    pub fn new(work_path: PathBuf, config: Arc<Config>) -> Self {
        Self {
            work_path,
            agent_mode: AgentMode::Default,
            shell_unrestricted: false,
            session_id: None,
            gate_approved: false,
            config,
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.agent_mode = mode;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_shell_unrestricted(mut self, unrestricted: bool) -> Self {
        self.shell_unrestricted = unrestricted;
        self
    }

    pub(crate) fn approved(mut self) -> Self {
        self.gate_approved = true;
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
