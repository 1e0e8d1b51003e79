// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    version,
    about = "Agent orchestration backend: streaming ReAct loop, gated tools, workspace snapshots"
)]
pub struct Cli {
    /// Explicit config file (overrides the search path and APP_CONFIG_PATH)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (equivalent to RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP node (default when no subcommand is given)
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1", env = "KEEL_HOST")]
        host: String,
        /// Bind port
        #[arg(long, default_value_t = 8640, env = "KEEL_PORT")]
        port: u16,
    },
    /// Print the effective merged configuration as YAML
    Config,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
