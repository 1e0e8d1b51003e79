// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use keel_core::{SessionRuntime, StopRegistry};
use keel_node::AppState;
use keel_pty::PtyManager;
use keel_snapshot::{SnapshotStore, WorkspaceArchiver};
use keel_store::{PermissionBroker, Store};
use keel_tools::{builtin::register_builtins, ToolDispatcher, ToolRegistry};

/// Interval of the background sweeper that closes idle PTY processes.
const PTY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = keel_config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Some(Commands::Config) => {
            print!("{}", serde_yaml_string(&config)?);
            Ok(())
        }
        Some(Commands::Serve { ref host, port }) => {
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid bind address {host}:{port}"))?;
            serve(config, cli.config.clone(), addr).await
        }
        None => {
            let addr: SocketAddr = "127.0.0.1:8640".parse().expect("static address");
            serve(config, cli.config.clone(), addr).await
        }
    }
}

async fn serve(
    config: keel_config::Config,
    config_path: Option<std::path::PathBuf>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let db_path = keel_config::db_path();
    let store = Arc::new(Store::open(&db_path)?);

    let mut shared = keel_config::SharedConfig::new(config);
    if let Some(path) = config_path {
        // Allowlist auto-appends persist back to the operator's config file.
        shared = shared.with_persist_path(path);
    }

    let snapshots = Arc::new(SnapshotStore::new(
        store.clone(),
        WorkspaceArchiver::new(keel_config::snapshot_dir()),
    ));
    let broker = Arc::new(PermissionBroker::new(store.clone()));

    let mut registry = ToolRegistry::new();
    register_builtins(&mut registry);
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(registry),
        Some(broker.clone()),
        shared.clone(),
    ));

    let runtime = Arc::new(SessionRuntime::new(
        store.clone(),
        snapshots,
        shared.clone(),
        dispatcher,
        Arc::new(StopRegistry::new()),
    ));

    let pty = Arc::new(PtyManager::new());
    pty.spawn_idle_sweeper(PTY_SWEEP_INTERVAL);

    let state = AppState {
        runtime,
        store,
        broker,
        pty,
        config: shared,
    };
    keel_node::serve(state, addr).await
}

fn serde_yaml_string(config: &keel_config::Config) -> anyhow::Result<String> {
    serde_yaml::to_string(config).context("serializing config")
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
