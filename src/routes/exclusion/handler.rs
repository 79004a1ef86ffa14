use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::AppError,
    routes::group::GroupIdRequest,
    utils::{Claims, success_to_api_response},
};

use super::model::{CreateExclusionRequest, DeleteExclusionRequest, Exclusion};

#[axum::debug_handler]
pub async fn list_exclusions(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let exclusions = Exclusion::list(&state.pool, query.group_id, claims.user_id()?).await?;
    Ok((StatusCode::OK, success_to_api_response(exclusions)))
}

#[axum::debug_handler]
pub async fn create_exclusion(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CreateExclusionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let exclusion = Exclusion::create(&state.pool, claims.user_id()?, req).await?;
    Ok((StatusCode::OK, success_to_api_response(exclusion)))
}

#[axum::debug_handler]
pub async fn delete_exclusion(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<DeleteExclusionRequest>,
) -> Result<impl IntoResponse, AppError> {
    Exclusion::delete(&state.pool, claims.user_id()?, req).await?;
    Ok((StatusCode::OK, success_to_api_response(())))
}
