use axum::{
    extract::{Extension, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    chat::relay::{self, MAX_MESSAGE_SIZE},
    error::AppError,
    hub::{OUTBOUND_CAPACITY, Session},
    routes::group::GroupIdRequest,
    utils::{Claims, success_to_api_response},
};

use super::model;

/// 浏览器的 WebSocket 无法设置请求头，token 通过查询参数传递
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub group_id: Uuid,
    pub token: Option<String>,
}

#[axum::debug_handler]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, AppError> {
    let grant = model::authorize_connection(
        &state.pool,
        &state.config,
        query.group_id,
        query.token.as_deref(),
    )
    .await?;

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            let (session, outbound) = Session::new(
                grant.user_id,
                grant.participant_id,
                grant.group_id,
                OUTBOUND_CAPACITY,
            );
            let (sink, stream) = socket.split();

            relay::serve(
                sink,
                stream,
                session,
                outbound,
                state.hub.clone(),
                state.pool.clone(),
                state.cipher.clone(),
            )
            .await;
        }))
}

#[axum::debug_handler]
pub async fn with_receiver(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let messages =
        model::history_as_giver(&state.pool, &state.cipher, query.group_id, claims.user_id()?)
            .await?;
    Ok((StatusCode::OK, success_to_api_response(messages)))
}

#[axum::debug_handler]
pub async fn with_giver(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let messages =
        model::history_as_receiver(&state.pool, &state.cipher, query.group_id, claims.user_id()?)
            .await?;
    Ok((StatusCode::OK, success_to_api_response(messages)))
}

#[axum::debug_handler]
pub async fn unread(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let counts = model::unread_counts(&state.pool, query.group_id, claims.user_id()?).await?;
    Ok((StatusCode::OK, success_to_api_response(counts)))
}
