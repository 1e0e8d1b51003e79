// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod decode;
mod manager;
mod process;
mod spawn;

pub use decode::decode_output_bytes;
pub use manager::PtyManager;
pub use process::{clamp_buffer_size, PtyProcess, PtyStatus, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use spawn::{spawn_pty, SpawnOptions};
