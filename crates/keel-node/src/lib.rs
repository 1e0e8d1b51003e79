// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod attachments;
mod error;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use keel_config::SharedConfig;
use keel_core::SessionRuntime;
use keel_pty::PtyManager;
use keel_store::{PermissionBroker, Store};

pub use attachments::{preprocess_attachment, RawAttachment};
pub use error::ApiError;

/// Shared handles every route works against.  All services are process-wide
/// values created at startup and passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<SessionRuntime>,
    pub store: Arc<Store>,
    pub broker: Arc<PermissionBroker>,
    pub pty: Arc<PtyManager>,
    pub config: SharedConfig,
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Chat
        .route("/chat/stream", post(routes::chat::chat_stream))
        .route("/chat", post(routes::chat::chat))
        .route("/chat/stop", post(routes::chat::chat_stop))
        .route("/chat/rollback", post(routes::chat::chat_rollback))
        // Sessions
        .route("/sessions", get(routes::sessions::list_sessions))
        .route(
            "/sessions/:id",
            get(routes::sessions::get_session).delete(routes::sessions::delete_session),
        )
        .route("/sessions/:id/messages", get(routes::sessions::session_messages))
        // Model configs
        .route(
            "/configs",
            get(routes::configs::list_configs).post(routes::configs::create_config),
        )
        .route(
            "/configs/:id",
            get(routes::configs::get_config)
                .put(routes::configs::update_config)
                .delete(routes::configs::delete_config),
        )
        // Permission queue
        .route("/permissions/pending", get(routes::permissions::pending_permissions))
        .route("/permissions/:id", post(routes::permissions::decide_permission))
        // Interactive terminals
        .route("/sessions/:id/pty", post(routes::pty::open_pty))
        .route(
            "/sessions/:id/pty/:pty_id",
            get(routes::pty::read_pty).delete(routes::pty::close_pty),
        )
        .route("/sessions/:id/pty/:pty_id/write", post(routes::pty::write_pty))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "keel node listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
