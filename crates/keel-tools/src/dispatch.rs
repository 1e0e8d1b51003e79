// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use keel_config::{AgentMode, SharedConfig};
use keel_store::{PermissionBroker, PermissionStatus};

use crate::context::ToolContext;
use crate::policy::{GateCheck, GateReason};
use crate::registry::ToolRegistry;
use crate::tool::{ToolError, ToolInput};

/// Canonical observation text for a denied invocation.
pub const PERMISSION_DENIED: &str = "Permission denied.";
/// Canonical observation text for an expired permission request.
pub const PERMISSION_TIMED_OUT: &str = "Permission request timed out.";

/// Typed outcome of a dispatch, mapped by the runtime to event kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Ok(String),
    /// No tool with that name — the loop emits an error step and continues,
    /// giving the model a chance to correct itself.
    NotFound(String),
    PolicyDenied,
    PolicyTimeout,
    Failure(String),
}

impl DispatchResult {
    /// The text recorded as the observation for this outcome.
    pub fn observation_text(&self) -> String {
        match self {
            DispatchResult::Ok(text) => text.clone(),
            DispatchResult::NotFound(name) => format!("tool not found: {name}"),
            DispatchResult::PolicyDenied => PERMISSION_DENIED.to_string(),
            DispatchResult::PolicyTimeout => PERMISSION_TIMED_OUT.to_string(),
            DispatchResult::Failure(msg) => format!("Tool execution failed: {msg}"),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, DispatchResult::Ok(_))
    }
}

/// Routes a named tool invocation through argument parsing, policy gates,
/// out-of-band permission and finally execution on a worker task.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    broker: Option<Arc<PermissionBroker>>,
    config: SharedConfig,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        broker: Option<Arc<PermissionBroker>>,
        config: SharedConfig,
    ) -> Self {
        Self {
            registry,
            broker,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Build a per-invocation context with a consistent config snapshot.
    pub fn make_context(
        &self,
        work_path: PathBuf,
        mode: AgentMode,
        shell_unrestricted: bool,
        session_id: Option<String>,
    ) -> ToolContext {
        let mut ctx = ToolContext::new(work_path, self.config.snapshot())
            .with_mode(mode)
            .with_shell_unrestricted(shell_unrestricted);
        ctx.session_id = session_id;
        ctx
    }

    /// Invoke `name` with `raw_input` under `ctx`.
    ///
    /// A gate violation files a permission request and blocks — polling, off
    /// any repository lock — until the approver decides or the shell
    /// permission timeout elapses.  An approved allowlist miss in default
    /// mode auto-appends the command's basename to the allowlist.
    pub async fn dispatch(&self, name: &str, raw_input: &str, ctx: &ToolContext) -> DispatchResult {
        let Some(tool) = self.registry.resolve(name) else {
            return DispatchResult::NotFound(name.to_string());
        };
        let params = tool.parameters();
        let primary = params.iter().find(|p| p.required).map(|p| p.name);
        let input = ToolInput::parse(raw_input, primary);

        let exec_ctx = match tool.gate(&input, ctx) {
            GateCheck::Allow => ctx.clone(),
            check @ GateCheck::Require { .. } => {
                match self.await_permission(tool.name(), &check, ctx).await {
                    Ok(approved_ctx) => approved_ctx,
                    Err(result) => return result,
                }
            }
        };

        // Tool bodies run on their own task: a panic is contained and slow
        // tools never stall the event-streaming path.
        let task_tool = tool.clone();
        let task_input = input.clone();
        let task_ctx = exec_ctx.clone();
        let handle =
            tokio::spawn(async move { task_tool.execute(&task_input, &task_ctx).await });
        match handle.await {
            Ok(Ok(text)) => DispatchResult::Ok(text),
            Ok(Err(ToolError::Invalid(msg))) | Ok(Err(ToolError::Failed(msg))) => {
                DispatchResult::Failure(msg)
            }
            Err(e) => DispatchResult::Failure(format!("tool panicked: {e}")),
        }
    }

    async fn await_permission(
        &self,
        tool_name: &str,
        check: &GateCheck,
        ctx: &ToolContext,
    ) -> Result<ToolContext, DispatchResult> {
        let GateCheck::Require {
            action,
            subject,
            reasons,
        } = check
        else {
            return Ok(ctx.clone());
        };
        let Some(broker) = &self.broker else {
            // No approval channel configured: violations are final.
            return Err(DispatchResult::PolicyDenied);
        };

        let reason_text = check.reason_text();
        let request_id = match broker.create(
            tool_name,
            action.as_str(),
            subject,
            &reason_text,
            ctx.session_id.as_deref(),
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!("failed to file permission request: {e}");
                return Err(DispatchResult::Failure(format!(
                    "failed to file permission request: {e}"
                )));
            }
        };

        let timeout = Duration::from_secs_f64(ctx.config.shell.permission_timeout_sec.max(0.0));
        match broker.wait_for_decision(request_id, timeout).await {
            Ok(PermissionStatus::Approved) => {
                debug!(request_id, tool_name, "permission approved");
                self.record_allowlist_grant(reasons, ctx);
                // Refresh the config snapshot so the execution sees the
                // (possibly) grown allowlist.
                let mut approved = ctx.clone().approved();
                approved.config = self.config.snapshot();
                Ok(approved)
            }
            Ok(PermissionStatus::Denied) => Err(DispatchResult::PolicyDenied),
            Ok(PermissionStatus::Timeout) | Ok(PermissionStatus::Pending) => {
                Err(DispatchResult::PolicyTimeout)
            }
            Err(e) => Err(DispatchResult::Failure(format!(
                "permission wait failed: {e}"
            ))),
        }
    }

    /// An approved allowlist miss in default mode teaches the allowlist the
    /// new command, so the operator is asked only once per command.
    fn record_allowlist_grant(&self, reasons: &[GateReason], ctx: &ToolContext) {
        if ctx.agent_mode != AgentMode::Default || ctx.shell_unrestricted {
            return;
        }
        for reason in reasons {
            if let GateReason::NotInAllowlist { basename } = reason {
                if self.config.allowlist_insert(basename) {
                    debug!(basename = %basename, "appended approved command to shell allowlist");
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
