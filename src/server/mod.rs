//! HTTP surface used by the control plane.
//!
//! | Route | Auth | Purpose |
//! |---|---|---|
//! | `GET /health` | no | liveness |
//! | `POST /api/update` | bearer | start a self-update cycle |
//! | `GET /api/status` | bearer | managed service and agent status |
//! | `POST /api/restart` | bearer | restart the managed service |

pub mod auth;
pub mod handlers;
pub mod restart_command;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::AgentConfig;
use crate::upgrade::SelfUpdater;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentConfig>,
    pub updater: Arc<SelfUpdater>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/update", post(handlers::update))
        .route("/api/status", get(handlers::status))
        .route("/api/restart", post(handlers::restart))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new().route("/health", get(handlers::health)).merge(protected).with_state(state)
}

/// Serve on an already bound listener until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!("Agent listening on {}", addr);

    if !state.config.has_token() {
        tracing::warn!("No token configured; authenticated endpoints will reject every request");
    }

    axum::serve(listener, router(state)).await.context("HTTP server failed")
}
