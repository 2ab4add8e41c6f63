// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  Health is public; everything else
// requires the admin Bearer token via the `AuthBearer` extractor.
//
// Settings changes are persisted first, then applied to the supervisor, so a
// restart always resumes from what the last successful call stored.
//
// CORS is configured permissively; tighten `allow_origin` in production.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::monitor::SupervisorError;
use crate::types::{UserId, UserMonitorConfig};
use crate::user_store::UserStore;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/sessions", get(sessions))
        .route("/api/v1/channels", get(channels))
        .route("/api/v1/users/:id/settings", put(put_settings))
        .route("/api/v1/users/:id", delete(delete_user))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

/// Write the user store off the async workers.
async fn persist(store: Arc<UserStore>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || store.save())
        .await
        .context("user store save task failed")?
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
    symbols: usize,
    settings_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        active_sessions: state.supervisor.active_sessions().len(),
        symbols: state.supervisor.symbol_count(),
        settings_version: state.settings_version(),
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Sessions & channels (authenticated)
// =============================================================================

async fn sessions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.supervisor.active_sessions())
}

async fn channels(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.channels.clone())
}

// =============================================================================
// User settings (authenticated)
// =============================================================================

async fn put_settings(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(config): Json<UserMonitorConfig>,
) -> Response {
    if !config.channel.is_empty() && !state.channels.iter().any(|c| c.name == config.channel) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("unknown channel '{}'", config.channel),
        );
    }

    state.user_store.set(user_id, config.clone());
    if let Err(e) = persist(state.user_store.clone()).await {
        error!(user_id, error = %e, "failed to persist user settings");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist settings");
    }
    let version = state.bump_settings_version();

    match state.supervisor.start_session(user_id, config) {
        Ok(session_id) => {
            info!(user_id, session_id = %session_id, version, "settings applied");
            let body = serde_json::json!({
                "user_id": user_id,
                "session_id": session_id,
                "settings_version": version,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e @ SupervisorError::Ineligible { .. }) => {
            // Stored settings no longer describe a usable monitor.
            state.supervisor.stop_session(user_id);
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
        Err(e @ (SupervisorError::NoSymbols | SupervisorError::ShuttingDown)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn delete_user(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Response {
    if state.user_store.remove(user_id).is_none() {
        return error_response(StatusCode::NOT_FOUND, format!("no settings for user {user_id}"));
    }
    if let Err(e) = persist(state.user_store.clone()).await {
        error!(user_id, error = %e, "failed to persist user removal");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist settings");
    }
    state.bump_settings_version();

    let stopped = state.supervisor.stop_session(user_id);
    info!(user_id, stopped, "user removed");

    Json(serde_json::json!({ "user_id": user_id, "session_stopped": stopped })).into_response()
}

// =============================================================================
// Tests
// =============================================================================
