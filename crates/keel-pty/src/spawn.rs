// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use anyhow::Context;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tracing::{debug, warn};

use crate::process::PtyProcess;

/// Options for starting an interactive process.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub command: String,
    pub cwd: Option<std::path::PathBuf>,
    pub buffer_size: Option<usize>,
    pub idle_timeout_ms: u64,
    pub rows: u16,
    pub cols: u16,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            command: String::new(),
            cwd: None,
            buffer_size: None,
            idle_timeout_ms: 0,
            rows: 24,
            cols: 80,
        }
    }
}

/// Start `command` under a pseudo-terminal and wire its I/O into a
/// [`PtyProcess`].
///
/// The reader runs on a dedicated OS thread — the PTY read is a blocking
/// kernel read and must never sit on the async runtime.  On EOF the child is
/// reaped and the process transitions to `exited`.
pub fn spawn_pty(session_id: &str, opts: SpawnOptions) -> anyhow::Result<Arc<PtyProcess>> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: opts.rows,
            cols: opts.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("opening pty")?;

    let mut builder = shell_command(&opts.command);
    if let Some(cwd) = &opts.cwd {
        builder.cwd(cwd);
    }
    let child = pair
        .slave
        .spawn_command(builder)
        .context("spawning pty command")?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .context("cloning pty reader")?;
    let writer = pair.master.take_writer().context("taking pty writer")?;

    let child = Arc::new(Mutex::new(child));
    let killer = child.clone();
    let terminator = Box::new(move || {
        if let Err(e) = killer.lock().expect("pty child poisoned").kill() {
            debug!("pty kill failed (process may have exited): {e}");
        }
    });

    let proc = Arc::new(PtyProcess::new(
        session_id,
        opts.command.clone(),
        true,
        opts.buffer_size,
        opts.idle_timeout_ms,
        Some(Box::new(writer)),
        Some(terminator),
    ));

    // Keep the master alive for the lifetime of the reader thread; dropping
    // it would close the PTY under the child.
    let master = pair.master;
    let reader_proc = proc.clone();
    std::thread::Builder::new()
        .name(format!("pty-read-{}", proc.id))
        .spawn(move || {
            let _master = master;
            let mut buf = [0u8; 8192];
            loop {
                match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => reader_proc.append_output(&buf[..n]),
                    Err(e) => {
                        debug!("pty read ended: {e}");
                        break;
                    }
                }
            }
            let code = child
                .lock()
                .expect("pty child poisoned")
                .wait()
                .map(|status| status.exit_code() as i32)
                .ok();
            reader_proc.mark_exited(code);
        })
        .map_err(|e| {
            warn!("failed to start pty reader thread: {e}");
            anyhow::anyhow!("failed to start pty reader thread: {e}")
        })?;

    Ok(proc)
}

#[cfg(unix)]
fn shell_command(command: &str) -> CommandBuilder {
    let mut builder = CommandBuilder::new("/bin/sh");
    builder.arg("-c");
    builder.arg(command);
    builder
}

#[cfg(windows)]
fn shell_command(command: &str) -> CommandBuilder {
    let mut builder = CommandBuilder::new("cmd.exe");
    builder.arg("/C");
    builder.arg(command);
    builder
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
