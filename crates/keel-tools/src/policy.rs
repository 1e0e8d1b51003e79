// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};

use keel_config::AgentMode;

use crate::context::ToolContext;

/// What a file-touching tool intends to do; selects which containment
/// exemptions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
    Execute,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Read => "read",
            FileAction::Write => "write",
            FileAction::Execute => "execute",
        }
    }
}

/// One concrete rule violation.  The display strings are the canonical
/// reasons recorded on permission requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReason {
    OutsideWorkPath,
    ShellOperators,
    NotInAllowlist { basename: String },
    PathEscape,
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateReason::OutsideWorkPath => write!(f, "Path outside work path."),
            GateReason::ShellOperators => write!(f, "Shell operators detected."),
            GateReason::NotInAllowlist { .. } => write!(f, "Command not in allowlist."),
            GateReason::PathEscape => {
                write!(f, "Command may access paths outside work path.")
            }
        }
    }
}

/// Outcome of a policy gate, evaluated before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCheck {
    Allow,
    /// Execution must wait for an out-of-band approval.
    Require {
        action: FileAction,
        /// Path-or-command string recorded on the permission request.
        subject: String,
        reasons: Vec<GateReason>,
    },
}

impl GateCheck {
    pub fn require(action: FileAction, subject: impl Into<String>, reasons: Vec<GateReason>) -> Self {
        Self::Require {
            action,
            subject: subject.into(),
            reasons,
        }
    }

    /// Concatenated canonical reason string for the permission request row.
    pub fn reason_text(&self) -> String {
        match self {
            GateCheck::Allow => String::new(),
            GateCheck::Require { reasons, .. } => reasons
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

// ─── Path containment ─────────────────────────────────────────────────────────

/// Lexically resolve `raw` against `base`: make it absolute and fold away
/// `.` / `..` components without touching the filesystem (the target may not
/// exist yet).
pub fn normalize_path(base: &Path, raw: &str) -> PathBuf {
    let candidate = PathBuf::from(raw);
    let joined = if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    };
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    let mut prefix = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(p) => prefix.push(p.as_os_str()),
            Component::RootDir => prefix.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(c) => parts.push(c.to_os_string()),
        }
    }
    let mut result = prefix;
    for part in parts {
        result.push(part);
    }
    result
}

/// Containment test matching the permission model: case-insensitive prefix
/// compare so policy behaves identically on case-insensitive filesystems.
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let path_str = path.display().to_string().to_lowercase();
    let root_str = root.display().to_string().to_lowercase();
    if path_str == root_str {
        return true;
    }
    let sep = std::path::MAIN_SEPARATOR;
    path_str.starts_with(&format!("{root_str}{sep}"))
}

/// Resolve a tool-supplied path against the work path and apply the
/// containment gate.
///
/// Exemptions: `super` mode skips the gate entirely; `shell_safe` permits
/// read-only actions outside the root.  A previously approved invocation
/// (`ctx.gate_approved`) also passes.
pub fn resolve_in_root(
    raw: &str,
    ctx: &ToolContext,
    action: FileAction,
) -> Result<PathBuf, GateCheck> {
    let resolved = normalize_path(&ctx.work_path, raw);
    if is_within_root(&resolved, &ctx.work_path) {
        return Ok(resolved);
    }
    let exempt = ctx.gate_approved
        || ctx.agent_mode == AgentMode::Super
        || (ctx.agent_mode == AgentMode::ShellSafe && action == FileAction::Read);
    if exempt {
        return Ok(resolved);
    }
    Err(GateCheck::require(
        action,
        resolved.display().to_string(),
        vec![GateReason::OutsideWorkPath],
    ))
}

// ─── Shell command analysis ───────────────────────────────────────────────────

/// Split a command line on whitespace, honouring single and double quotes.
/// Quote characters are kept; callers strip them per token.
fn split_tokens(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in command.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    current.push(ch);
                    quote = Some(ch);
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_quotes(token: &str) -> &str {
    token
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
}

/// First token's basename, lowercased, with Windows executable suffixes
/// removed.  This is the identity the allowlist matches on.
pub fn command_basename(command: &str) -> String {
    let tokens = split_tokens(command);
    let Some(first) = tokens.first() else {
        return String::new();
    };
    let cleaned = strip_quotes(first);
    let base = Path::new(cleaned)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for suffix in [".exe", ".cmd", ".bat"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    base
}

/// Operators that chain, redirect or background — disallowed in default mode
/// because they defeat single-command review.
pub fn contains_shell_operators(command: &str) -> bool {
    ["&", "|", ">", "<", ";"].iter().any(|op| command.contains(op))
}

/// Tokens that might name a filesystem path, including values of
/// `key=value` arguments.
fn extract_path_candidates(command: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    for token in split_tokens(command) {
        let item = strip_quotes(&token).to_string();
        if item.is_empty() {
            continue;
        }
        if let Some((_, value)) = item.split_once('=') {
            let value = strip_quotes(value).to_string();
            if !value.is_empty() {
                candidates.push(value);
            }
        }
        candidates.push(item);
    }
    candidates
}

fn looks_like_path(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    if candidate.starts_with("\\\\") || candidate.starts_with('/') {
        return true;
    }
    if candidate.len() > 2 && candidate.as_bytes()[1] == b':' {
        return true;
    }
    candidate.contains('\\') || candidate.contains('/')
}

/// True when any token resembling a path resolves outside the work path.
/// `..` anywhere in the command is a violation outright.
pub fn command_targets_outside_root(command: &str, root: &Path) -> bool {
    if command.contains("..") {
        return true;
    }
    for candidate in extract_path_candidates(command) {
        if !looks_like_path(&candidate) {
            continue;
        }
        let resolved = normalize_path(root, &candidate);
        if !is_within_root(&resolved, root) {
            return true;
        }
    }
    false
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
