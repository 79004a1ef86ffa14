use axum::{
    extract::{Extension, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::AppError,
    utils::{Claims, success_to_api_response},
};

use super::model::{
    CreateGroupRequest, DrawResponse, Group, GroupDetail, GroupIdRequest, JoinGroupRequest,
    participant_id,
};

#[axum::debug_handler]
pub async fn create_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let group = Group::create(&state.pool, claims.user_id()?, req).await?;
    Ok((StatusCode::OK, success_to_api_response(group)))
}

#[axum::debug_handler]
pub async fn my_groups(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let groups = Group::list_for_user(&state.pool, claims.user_id()?).await?;
    Ok((StatusCode::OK, success_to_api_response(groups)))
}

#[axum::debug_handler]
pub async fn find_by_id(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::find_by_id(&state.pool, query.group_id)
        .await?
        .ok_or(AppError::NotFound("group"))?;

    // 只有成员可以看到成员列表和邀请码
    participant_id(&state.pool, group.group_id, claims.user_id()?).await?;

    let participants = Group::members(&state.pool, group.group_id).await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(GroupDetail {
            group,
            participants,
        }),
    ))
}

#[axum::debug_handler]
pub async fn join_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<JoinGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = Group::join(&state.pool, claims.user_id()?, req).await?;
    Ok((StatusCode::OK, success_to_api_response(group)))
}

#[axum::debug_handler]
pub async fn delete_group(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    Group::delete(&state.pool, req.group_id, claims.user_id()?).await?;
    Ok((StatusCode::OK, success_to_api_response(())))
}

#[axum::debug_handler]
pub async fn draw(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let assignments = Group::draw(&state.pool, req.group_id, claims.user_id()?).await?;

    Ok((
        StatusCode::OK,
        success_to_api_response(DrawResponse {
            group_id: req.group_id,
            assignments,
        }),
    ))
}

#[axum::debug_handler]
pub async fn my_assignment(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<GroupIdRequest>,
) -> Result<impl IntoResponse, AppError> {
    let assignment = Group::my_assignment(&state.pool, query.group_id, claims.user_id()?).await?;
    Ok((StatusCode::OK, success_to_api_response(assignment)))
}
