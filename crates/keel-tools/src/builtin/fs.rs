// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::io::{Read, Seek, SeekFrom};

use async_trait::async_trait;

use crate::context::ToolContext;
use crate::policy::{resolve_in_root, FileAction, GateCheck};
use crate::tool::{Tool, ToolError, ToolInput, ToolParameter};

/// Read a slice of a file inside the work path.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file inside the work path."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", "string", "Relative path under the work path."),
            ToolParameter::optional("start", "number", "Byte offset to start reading."),
            ToolParameter::optional("max_bytes", "number", "Max bytes to read."),
        ]
    }

    fn gate(&self, input: &ToolInput, ctx: &ToolContext) -> GateCheck {
        let Some(path) = input.str_arg_or_raw("path") else {
            return GateCheck::Allow; // execution reports the missing argument
        };
        match resolve_in_root(&path, ctx, FileAction::Read) {
            Ok(_) => GateCheck::Allow,
            Err(check) => check,
        }
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = input
            .str_arg_or_raw("path")
            .ok_or_else(|| ToolError::invalid("Missing path."))?;
        let start = input.u64_arg("start").unwrap_or(0);
        let max_bytes = input
            .u64_arg("max_bytes")
            .unwrap_or(ctx.config.files.max_bytes as u64);
        if max_bytes == 0 {
            return Err(ToolError::invalid("Invalid start or max_bytes."));
        }

        let file_path = resolve_in_root(&path, ctx, FileAction::Read)
            .map_err(|check| ToolError::failed(check.reason_text()))?;
        if !file_path.is_file() {
            return Err(ToolError::invalid(format!(
                "File not found: {}",
                file_path.display()
            )));
        }

        let file_path_clone = file_path.clone();
        let raw = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut file = std::fs::File::open(&file_path_clone)?;
            file.seek(SeekFrom::Start(start))?;
            let mut buf = vec![0u8; max_bytes as usize];
            let mut filled = 0usize;
            loop {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
                if filled == buf.len() {
                    break;
                }
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
        .map_err(|e| ToolError::failed(format!("read task failed: {e}")))?
        .map_err(|e| ToolError::failed(format!("read failed: {e}")))?;

        let text = String::from_utf8_lossy(&raw);
        Ok(format!(
            "[read_file] {} bytes={} offset={}\n{}",
            file_path.display(),
            raw.len(),
            start,
            text
        ))
    }
}

/// Write or append content to a file inside the work path.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the work path."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", "string", "Relative path under the work path."),
            ToolParameter::required("content", "string", "Content to write."),
            ToolParameter::optional("mode", "string", "write or append."),
        ]
    }

    fn gate(&self, input: &ToolInput, ctx: &ToolContext) -> GateCheck {
        let Some(path) = input.str_arg("path") else {
            return GateCheck::Allow;
        };
        match resolve_in_root(path, ctx, FileAction::Write) {
            Ok(_) => GateCheck::Allow,
            Err(check) => check,
        }
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = input
            .str_arg("path")
            .ok_or_else(|| ToolError::invalid("Missing path or content."))?
            .to_string();
        let content = input
            .str_arg("content")
            .ok_or_else(|| ToolError::invalid("Missing path or content."))?
            .to_string();
        let append = input
            .str_arg("mode")
            .map(|m| m.eq_ignore_ascii_case("append"))
            .unwrap_or(false);

        let file_path = resolve_in_root(&path, ctx, FileAction::Write)
            .map_err(|check| ToolError::failed(check.reason_text()))?;

        let chars = content.chars().count();
        let target = file_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if append {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&target)?;
                file.write_all(content.as_bytes())?;
            } else {
                std::fs::write(&target, content.as_bytes())?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ToolError::failed(format!("write task failed: {e}")))?
        .map_err(|e| ToolError::failed(format!("write failed: {e}")))?;

        Ok(format!(
            "[write_file] wrote {} chars to {}",
            chars,
            file_path.display()
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use keel_config::{AgentMode, Config};

    fn ctx_in(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir.to_path_buf(), Arc::new(Config::default()))
    }

    fn input(json: &str) -> ToolInput {
        ToolInput::parse(json, Some("path"))
    }

    // ── read_file ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_file_returns_header_and_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello file").unwrap();
        let out = ReadFileTool
            .execute(&input(r#"{"path": "a.txt"}"#), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(out.starts_with("[read_file]"));
        assert!(out.contains("bytes=10"));
        assert!(out.ends_with("hello file"));
    }

    #[tokio::test]
    async fn read_file_respects_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "0123456789").unwrap();
        let out = ReadFileTool
            .execute(
                &input(r#"{"path": "a.txt", "start": 2, "max_bytes": 4}"#),
                &ctx_in(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.contains("offset=2"));
        assert!(out.ends_with("2345"));
    }

    #[tokio::test]
    async fn read_file_bare_string_input_is_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        let out = ReadFileTool
            .execute(&input("b.txt"), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert!(out.contains("b.txt"));
    }

    #[tokio::test]
    async fn read_missing_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadFileTool
            .execute(&input("nope.txt"), &ctx_in(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[test]
    fn read_gate_blocks_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let check = ReadFileTool.gate(&input("/etc/passwd"), &ctx_in(dir.path()));
        assert!(matches!(check, GateCheck::Require { .. }));
    }

    #[test]
    fn read_gate_allows_super_mode_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path()).with_mode(AgentMode::Super);
        assert_eq!(ReadFileTool.gate(&input("/etc/passwd"), &ctx), GateCheck::Allow);
    }

    // ── write_file ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_file_creates_parents_and_reports_chars() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteFileTool
            .execute(
                &input(r#"{"path": "sub/dir/f.txt", "content": "data"}"#),
                &ctx_in(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.contains("wrote 4 chars"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sub/dir/f.txt")).unwrap(),
            "data"
        );
    }

    #[tokio::test]
    async fn write_file_append_mode_appends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), "one\n").unwrap();
        WriteFileTool
            .execute(
                &input(r#"{"path": "log.txt", "content": "two\n", "mode": "append"}"#),
                &ctx_in(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "one\ntwo\n"
        );
    }

    #[tokio::test]
    async fn write_file_missing_content_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteFileTool
            .execute(&input(r#"{"path": "f.txt"}"#), &ctx_in(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing path or content"));
    }

    #[test]
    fn write_gate_blocks_shell_safe_mode_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path()).with_mode(AgentMode::ShellSafe);
        let check = WriteFileTool.gate(&input(r#"{"path": "/etc/x", "content": "y"}"#), &ctx);
        assert!(
            matches!(check, GateCheck::Require { .. }),
            "shell_safe exempts reads only"
        );
    }
}
