//! Defines the Axum API routes and handlers.

use crate::session::SessionManager;
use crate::web::socket::ws_handler;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub type AppState = Arc<SessionManager>;

/// Helper to create a JSON error response with a message and status code
pub(crate) fn json_error(message: &str, status: StatusCode) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/sessions/{id}/state", get(get_state))
        .route("/api/v1/sessions/{id}/events", get(get_events))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "sessions": state.len().await }))
}

/// Full board state of one session.
async fn get_state(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.get(&id).await {
        Some(session) => Json(session.model().lock().await.state_report()).into_response(),
        None => json_error(&format!("Unknown session '{id}'"), StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    since: u64,
}

/// Retained events newer than `since`, for clients catching up after a reconnect.
async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    match state.get(&id).await {
        Some(session) => {
            let events = session.model().lock().await.events().events_since(query.since);
            Json(events).into_response()
        }
        None => json_error(&format!("Unknown session '{id}'"), StatusCode::NOT_FOUND),
    }
}
