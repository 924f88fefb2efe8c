//! Request handlers.

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::server::AppState;
use crate::server::restart_command::RestartCommand;
use crate::service::{CommandRunner, ServiceStatus, SupervisorKind};
use crate::upgrade::UpdateRequest;

/// `{success, message}` body shared by every control endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub status: ServiceStatus,
    pub running: bool,
    pub supervisor: SupervisorKind,
    pub agent_status: ServiceStatus,
    pub agent_version: &'static str,
    pub updating: bool,
    pub checked_at: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
    })
}

/// Acknowledge the request and run the update cycle in the background.
pub async fn update(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<ApiResponse>) {
    let request: UpdateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to parse update request: {}", e);
            return (StatusCode::BAD_REQUEST, Json(ApiResponse::failure("Invalid request body")));
        }
    };

    info!(version = %request.version, "Received update request");

    let guard = match state.updater.try_begin() {
        Ok(guard) => guard,
        Err(e) => {
            warn!("Rejecting update request: {}", e);
            return (StatusCode::CONFLICT, Json(ApiResponse::failure(e.to_string())));
        }
    };

    let updater = Arc::clone(&state.updater);
    tokio::spawn(async move {
        // Outcome logging happens inside the cycle
        let _ = updater.run(request, guard).await;
    });

    (StatusCode::OK, Json(ApiResponse::success("Update started")))
}

/// Fresh status of the managed service and of the agent itself.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let resolver = state.updater.resolver();
    let service = state.config.service_name.clone();

    let status = if service.is_empty() {
        ServiceStatus::Unknown
    } else {
        resolver.resolve(&service).await
    };
    let agent_status = resolver.resolve(&state.config.agent_service_name).await;

    Json(StatusResponse {
        running: status.is_running(),
        service,
        status,
        supervisor: resolver.detect_supervisor(),
        agent_status,
        agent_version: env!("CARGO_PKG_VERSION"),
        updating: state.updater.is_updating(),
        checked_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Restart the managed service, via `restart_command` when one is configured.
pub async fn restart(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse>) {
    let service = state.config.service_name.as_str();
    let command = state.config.restart_command.trim();

    if !command.is_empty() {
        return run_restart_command(&state, &RestartCommand::parse(command)).await;
    }

    if service.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure("No service_name or restart_command configured")),
        );
    }

    match state.updater.restart_controller().restart_managed(service).await {
        Ok(kind) => {
            info!("Restarted {} via {}", service, kind);
            (StatusCode::OK, Json(ApiResponse::success(format!("Service restarted via {kind}"))))
        }
        Err(e) => {
            error!("Restart of {} failed: {}", service, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::failure(e.to_string())))
        }
    }
}

/// Run `restart_command`, falling back from `supervisorctl restart` to
/// `start` when the program was not running.
async fn run_restart_command(state: &AppState, command: &RestartCommand) -> (StatusCode, Json<ApiResponse>) {
    let runner: &dyn CommandRunner = state.updater.resolver().runner().as_ref();
    info!("Executing restart command: {}", command);

    let restart_err = match command.run(runner).await {
        Ok(()) => return (StatusCode::OK, Json(ApiResponse::success("Service restarted"))),
        Err(e) => e,
    };
    error!("Restart command failed: {:#}", restart_err);

    let Some(start) = command.start_fallback() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(format!("Restart failed: {restart_err:#}"))),
        );
    };

    warn!("Attempting to start service instead: {}", start);
    match start.run(runner).await {
        Ok(()) => {
            info!("Service started with fallback command");
            (StatusCode::OK, Json(ApiResponse::success("Service started (was not running)")))
        }
        Err(start_err) => {
            error!("Start command failed: {:#}", start_err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failure(format!(
                    "Restart and start both failed: restart: {restart_err:#}; start: {start_err:#}"
                ))),
            )
        }
    }
}
