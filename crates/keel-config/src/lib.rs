// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;
mod shared;

pub use loader::{data_dir, db_path, load, snapshot_dir};
pub use schema::{
    AgentConfig, AgentMode, Config, ContextConfig, FilesConfig, LlmConfig, RetryConfig,
    SearchConfig, ShellConfig,
};
pub use shared::SharedConfig;
