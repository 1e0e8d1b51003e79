// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::decode::decode_output_bytes;

pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;
pub const MAX_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Clamp a requested buffer size into the supported range.
pub fn clamp_buffer_size(value: Option<usize>) -> usize {
    match value {
        None => DEFAULT_BUFFER_SIZE,
        Some(0) => DEFAULT_BUFFER_SIZE,
        Some(v) => v.min(MAX_BUFFER_SIZE),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyStatus {
    Running,
    Exited,
    /// Terminal: the process was explicitly closed and deregistered.
    Closed,
}

impl PtyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PtyStatus::Running => "running",
            PtyStatus::Exited => "exited",
            PtyStatus::Closed => "closed",
        }
    }
}

struct BufferState {
    /// Ring of the most recent output bytes; older bytes are evicted from
    /// the head once `buffer_size` is exceeded.
    buffer: Vec<u8>,
    /// Byte index into total-output space of the default read position.
    cursor: u64,
    /// Total bytes ever produced, including evicted ones.
    total_bytes: u64,
    last_output_at: Instant,
    status: PtyStatus,
    exit_code: Option<i32>,
}

type Terminator = Box<dyn FnMut() + Send>;

/// One long-lived interactive process with a bounded output ring buffer.
///
/// Readers address output by absolute byte offset (`total_bytes` space); when
/// a cursor falls below the buffer start because of eviction, the read
/// returns `reset = true` so the client can resynchronize its view.
pub struct PtyProcess {
    pub id: String,
    pub session_id: String,
    pub command: String,
    pub pty_enabled: bool,
    pub buffer_size: usize,
    pub idle_timeout_ms: u64,
    state: Mutex<BufferState>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    terminator: Mutex<Option<Terminator>>,
}

impl PtyProcess {
    pub fn new(
        session_id: impl Into<String>,
        command: impl Into<String>,
        pty_enabled: bool,
        buffer_size: Option<usize>,
        idle_timeout_ms: u64,
        writer: Option<Box<dyn Write + Send>>,
        terminator: Option<Terminator>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self {
            id,
            session_id: session_id.into(),
            command: command.into(),
            pty_enabled,
            buffer_size: clamp_buffer_size(buffer_size),
            idle_timeout_ms,
            state: Mutex::new(BufferState {
                buffer: Vec::new(),
                cursor: 0,
                total_bytes: 0,
                last_output_at: Instant::now(),
                status: PtyStatus::Running,
                exit_code: None,
            }),
            writer: Mutex::new(writer),
            terminator: Mutex::new(terminator),
        }
    }

    pub fn status(&self) -> PtyStatus {
        self.state.lock().expect("pty state poisoned").status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.lock().expect("pty state poisoned").exit_code
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("pty state poisoned").total_bytes
    }

    /// Seconds since the last output byte arrived.
    pub fn idle_for_ms(&self) -> u64 {
        self.state
            .lock()
            .expect("pty state poisoned")
            .last_output_at
            .elapsed()
            .as_millis() as u64
    }

    /// Append raw output from the reader thread, evicting from the head on
    /// overflow.
    pub fn append_output(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut state = self.state.lock().expect("pty state poisoned");
        state.total_bytes += data.len() as u64;
        state.buffer.extend_from_slice(data);
        let len = state.buffer.len();
        if len > self.buffer_size {
            let overflow = len - self.buffer_size;
            state.buffer.drain(..overflow);
        }
        state.last_output_at = Instant::now();
    }

    /// Read decoded output starting at `cursor` (or the stored per-process
    /// cursor when `None`), up to `max_output` bytes.
    ///
    /// Returns `(text, new_cursor, reset)`.  `reset` is true when the
    /// requested position had already been evicted and the read was clamped
    /// to the buffer start.
    pub fn read(&self, cursor: Option<u64>, max_output: usize) -> (String, u64, bool) {
        let mut state = self.state.lock().expect("pty state poisoned");
        if max_output == 0 {
            return (String::new(), state.cursor, false);
        }
        let buffer_start = state.total_bytes - state.buffer.len() as u64;
        let mut effective = cursor.unwrap_or(state.cursor);
        let mut reset = false;
        if effective < buffer_start {
            effective = buffer_start;
            reset = true;
        }
        let start_idx = (effective - buffer_start) as usize;
        let end_idx = state.buffer.len().min(start_idx + max_output);
        let chunk = state.buffer[start_idx.min(state.buffer.len())..end_idx].to_vec();
        let new_cursor = effective + chunk.len() as u64;
        state.cursor = state.cursor.max(new_cursor);
        let stored = state.cursor;
        drop(state);
        (decode_output_bytes(&chunk), stored, reset)
    }

    /// Forward bytes to the process's stdin.  Returns bytes written.
    pub fn write(&self, data: &[u8]) -> std::io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut guard = self.writer.lock().expect("pty writer poisoned");
        match guard.as_mut() {
            Some(w) => {
                let n = w.write(data)?;
                w.flush()?;
                Ok(n)
            }
            None => Ok(0),
        }
    }

    /// Record process completion.  A no-op once closed.
    pub fn mark_exited(&self, exit_code: Option<i32>) {
        let mut state = self.state.lock().expect("pty state poisoned");
        if state.status == PtyStatus::Closed {
            return;
        }
        state.status = PtyStatus::Exited;
        state.exit_code = exit_code;
    }

    /// Transition to the terminal `closed` state and best-effort kill the
    /// underlying process.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().expect("pty state poisoned");
            if state.status == PtyStatus::Closed {
                return;
            }
            state.status = PtyStatus::Closed;
        }
        debug!(id = %self.id, "closing pty process");
        if let Some(mut terminate) = self.terminator.lock().expect("pty terminator poisoned").take()
        {
            terminate();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
