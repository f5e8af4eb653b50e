//! HTTP route handlers.
//!
//! Handlers translate between JSON and the conversation orchestrator. Chat
//! errors become [`ApiError`]s; handler failures never reach here because the
//! orchestrator already answered them with an apology.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_chat::{ChatReply, RouteScore};
use parley_core::types::ConversationTurn;

use crate::error::ApiError;
use crate::state::AppState;
use crate::ui::CHAT_HTML;

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

/// POST /chat - route one message and return the answer.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let session_id = req.session_id.trim();
    if session_id.is_empty() {
        return Err(ApiError::BadRequest("session_id cannot be empty".to_string()));
    }
    let reply = state.orchestrator.handle(session_id, &req.message).await?;
    Ok(Json(reply))
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

/// GET /sessions/{id}/history?limit=N - stored turns, oldest first.
pub async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let turns = state.orchestrator.history(&session_id, params.limit);
    Json(HistoryResponse { session_id, turns })
}

/// DELETE /sessions/{id} - forget a session. Always 204.
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.orchestrator.clear_session(&session_id);
    info!(session_id = %session_id, "Session history cleared");
    StatusCode::NO_CONTENT
}

// =============================================================================
// Routing diagnostics
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RoutesResponse {
    pub routes: Vec<String>,
}

/// GET /routes - configured intent routes in declaration order.
pub async fn list_routes(State(state): State<AppState>) -> Json<RoutesResponse> {
    Json(RoutesResponse {
        routes: state.orchestrator.route_names(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ClassifyParams {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub route: String,
    pub score: f64,
    pub scores: Vec<RouteScore>,
}

/// GET /classify?q=... - which route a message would take, and why.
pub async fn classify(
    State(state): State<AppState>,
    Query(params): Query<ClassifyParams>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let q = params
        .q
        .ok_or_else(|| ApiError::BadRequest("missing query parameter 'q'".to_string()))?;
    let (result, scores) = state.orchestrator.explain(&q).await?;
    Ok(Json(ClassifyResponse {
        route: result.label().to_string(),
        score: result.score,
        scores,
    }))
}

// =============================================================================
// Health and UI
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sessions: usize,
    pub routes: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions: state.orchestrator.store().len(),
        routes: state.orchestrator.route_names().len(),
    })
}

/// GET /ui - the self-contained chat page.
pub async fn ui() -> impl IntoResponse {
    Html(CHAT_HTML)
}
