use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::{AppState, utils::success_to_api_response};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub live_sessions: usize,
}

#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let live_sessions = state.hub.session_count().await;
    (
        StatusCode::OK,
        success_to_api_response(HealthResponse {
            status: "ok",
            live_sessions,
        }),
    )
}
