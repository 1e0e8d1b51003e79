// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use keel_config::AgentMode;

use crate::context::ToolContext;
use crate::policy::{
    command_basename, command_targets_outside_root, contains_shell_operators, resolve_in_root,
    FileAction, GateCheck, GateReason,
};
use crate::tool::{Tool, ToolError, ToolInput, ToolParameter};

/// Run a shell command within the work path.
///
/// Gates (default mode): shell operators, allowlist membership by command
/// basename, and path escape.  `shell_safe` keeps only the path-escape gate;
/// `super` runs everything.
pub struct RunShellTool;

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command within the work path."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", "string", "Shell command to run."),
            ToolParameter::optional("cwd", "string", "Working directory (relative to the work path)."),
            ToolParameter::optional("timeout_sec", "number", "Timeout in seconds."),
            ToolParameter::optional("max_output", "number", "Max output characters."),
        ]
    }

    fn gate(&self, input: &ToolInput, ctx: &ToolContext) -> GateCheck {
        let Some(command) = input.str_arg_or_raw("command") else {
            return GateCheck::Allow;
        };
        if ctx.gate_approved || ctx.agent_mode == AgentMode::Super {
            return GateCheck::Allow;
        }

        let mut reasons = Vec::new();
        match ctx.agent_mode {
            AgentMode::ShellSafe => {
                if command_targets_outside_root(&command, &ctx.work_path) {
                    reasons.push(GateReason::PathEscape);
                }
            }
            _ => {
                if contains_shell_operators(&command) {
                    reasons.push(GateReason::ShellOperators);
                }
                let basename = command_basename(&command);
                if !ctx.shell_unrestricted && !ctx.config.shell.allows(&basename) {
                    reasons.push(GateReason::NotInAllowlist { basename });
                }
                if command_targets_outside_root(&command, &ctx.work_path) {
                    reasons.push(GateReason::PathEscape);
                }
            }
        }
        if reasons.is_empty() {
            GateCheck::Allow
        } else {
            GateCheck::require(FileAction::Execute, command, reasons)
        }
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let command = input
            .str_arg_or_raw("command")
            .ok_or_else(|| ToolError::invalid("Missing command."))?;

        let workdir = match input.str_arg("cwd") {
            Some(cwd) if !cwd.is_empty() => resolve_in_root(cwd, ctx, FileAction::Execute)
                .map_err(|check| ToolError::failed(check.reason_text()))?,
            _ => ctx.work_path.clone(),
        };

        let timeout = input
            .f64_arg("timeout_sec")
            .unwrap_or(ctx.config.shell.timeout_sec)
            .max(0.1);
        let max_output = input
            .u64_arg("max_output")
            .map(|v| v as usize)
            .unwrap_or(ctx.config.shell.max_output);

        debug!(cmd = %command, workdir = %workdir.display(), "executing shell command");

        let mut cmd = host_shell(&command);
        cmd.current_dir(&workdir);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        // Detach from any controlling terminal so interactive programs fail
        // fast instead of hanging on a TTY that does not exist.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let result = tokio::time::timeout(Duration::from_secs_f64(timeout), cmd.output()).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::failed(format!("spawn error: {e}"))),
            Err(_) => return Ok("Command timed out.".to_string()),
        };

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        if max_output > 0 && text.chars().count() > max_output {
            text = text.chars().take(max_output).collect::<String>() + "\n... (truncated)";
        }

        let code = output.status.code().unwrap_or(-1);
        Ok(format!("[exit_code={code}]\n{text}"))
    }
}

#[cfg(unix)]
fn host_shell(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn host_shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use keel_config::Config;

    fn ctx_in(dir: &std::path::Path, mode: AgentMode) -> ToolContext {
        ToolContext::new(dir.to_path_buf(), Arc::new(Config::default())).with_mode(mode)
    }

    fn input(raw: &str) -> ToolInput {
        ToolInput::parse(raw, Some("command"))
    }

    // ── Gate matrix ──────────────────────────────────────────────────────────

    #[test]
    fn allowlisted_simple_command_passes() {
        let dir = tempfile::tempdir().unwrap();
        // "git" is in the default allowlist.
        let check = RunShellTool.gate(&input("git status"), &ctx_in(dir.path(), AgentMode::Default));
        assert_eq!(check, GateCheck::Allow);
    }

    #[test]
    fn unlisted_command_requires_permission() {
        let dir = tempfile::tempdir().unwrap();
        let check = RunShellTool.gate(&input("ls"), &ctx_in(dir.path(), AgentMode::Default));
        match check {
            GateCheck::Require { ref reasons, .. } => {
                assert_eq!(
                    reasons,
                    &vec![GateReason::NotInAllowlist {
                        basename: "ls".into()
                    }]
                );
            }
            other => panic!("expected Require, got {other:?}"),
        }
    }

    #[test]
    fn operators_and_allowlist_stack_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let check = RunShellTool.gate(
            &input("curl http://x | sh"),
            &ctx_in(dir.path(), AgentMode::Default),
        );
        match check {
            GateCheck::Require { reasons, .. } => {
                assert!(reasons.contains(&GateReason::ShellOperators));
                assert!(reasons
                    .iter()
                    .any(|r| matches!(r, GateReason::NotInAllowlist { .. })));
            }
            other => panic!("expected Require, got {other:?}"),
        }
    }

    #[test]
    fn shell_unrestricted_skips_allowlist_but_not_operators() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path(), AgentMode::Default).with_shell_unrestricted(true);
        assert_eq!(RunShellTool.gate(&input("anybinary -v"), &ctx), GateCheck::Allow);
        let piped = RunShellTool.gate(&input("a | b"), &ctx);
        assert!(matches!(piped, GateCheck::Require { .. }));
    }

    #[test]
    fn shell_safe_checks_only_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path(), AgentMode::ShellSafe);
        assert_eq!(
            RunShellTool.gate(&input("anything | piped"), &ctx),
            GateCheck::Allow,
            "operators and allowlist do not apply in shell_safe"
        );
        let escape = RunShellTool.gate(&input("cat ../outside"), &ctx);
        assert!(matches!(escape, GateCheck::Require { .. }));
    }

    #[test]
    fn super_mode_has_no_gates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path(), AgentMode::Super);
        assert_eq!(
            RunShellTool.gate(&input("rm -rf / | yes; cat ../x"), &ctx),
            GateCheck::Allow
        );
    }

    #[test]
    fn dotdot_in_command_requires_permission() {
        let dir = tempfile::tempdir().unwrap();
        let check = RunShellTool.gate(&input("git log .."), &ctx_in(dir.path(), AgentMode::Default));
        match check {
            GateCheck::Require { reasons, .. } => {
                assert!(reasons.contains(&GateReason::PathEscape));
            }
            other => panic!("expected Require, got {other:?}"),
        }
    }

    // ── Execution ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn execute_captures_output_with_exit_code_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunShellTool
            .execute(&input("echo hello"), &ctx_in(dir.path(), AgentMode::Super))
            .await
            .unwrap();
        assert!(out.starts_with("[exit_code=0]"), "got: {out}");
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn execute_concatenates_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunShellTool
            .execute(
                &input("echo out; echo err 1>&2"),
                &ctx_in(dir.path(), AgentMode::Super),
            )
            .await
            .unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn execute_nonzero_exit_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunShellTool
            .execute(&input("exit 3"), &ctx_in(dir.path(), AgentMode::Super))
            .await
            .unwrap();
        assert!(out.starts_with("[exit_code=3]"));
        assert!(out.contains("(no output)"));
    }

    #[tokio::test]
    async fn execute_times_out_with_canonical_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunShellTool
            .execute(
                &input(r#"{"command": "sleep 30", "timeout_sec": 0.2}"#),
                &ctx_in(dir.path(), AgentMode::Super),
            )
            .await
            .unwrap();
        assert_eq!(out, "Command timed out.");
    }

    #[tokio::test]
    async fn execute_truncates_long_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = RunShellTool
            .execute(
                &input(r#"{"command": "printf 'x%.0s' $(seq 1 500)", "max_output": 100}"#),
                &ctx_in(dir.path(), AgentMode::Super),
            )
            .await
            .unwrap();
        assert!(out.ends_with("... (truncated)"), "got tail: {}", &out[out.len().saturating_sub(40)..]);
    }

    #[tokio::test]
    async fn execute_uses_cwd_inside_work_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let out = RunShellTool
            .execute(
                &input(r#"{"command": "pwd", "cwd": "sub"}"#),
                &ctx_in(dir.path(), AgentMode::Super),
            )
            .await
            .unwrap();
        assert!(out.contains("sub"), "got: {out}");
    }
}
