//! Bearer token check for control-plane endpoints.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::server::AppState;
use crate::server::handlers::ApiResponse;

pub async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check_bearer(&state.config.token, req.headers()) {
        Ok(()) => next.run(req).await,
        Err(message) => {
            tracing::warn!("Rejected {} {}: {}", req.method(), req.uri().path(), message);
            (StatusCode::UNAUTHORIZED, Json(ApiResponse::failure(message))).into_response()
        }
    }
}

fn check_bearer(expected: &str, headers: &HeaderMap) -> Result<(), &'static str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err("Unauthorized");
    };
    let Ok(value) = value.to_str() else {
        return Err("Invalid authorization header format");
    };
    let Some(token) = value.trim().strip_prefix("Bearer ").map(str::trim) else {
        return Err("Invalid authorization header format");
    };
    if token.is_empty() {
        return Err("Invalid authorization header format");
    }
    if expected.is_empty() {
        return Err("Agent token not configured");
    }
    if token != expected {
        return Err("Invalid token");
    }
    Ok(())
}
