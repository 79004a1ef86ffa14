use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::AppError,
    utils::{Claims, generate_token, success_to_api_response},
};

use super::model::{AuthResponse, LoginRequest, RegisterRequest, User};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let user = User::create(&state.pool, req).await?;
    let (token, expires_at) = generate_token(&user.user_id, &state.config)?;

    Ok((
        StatusCode::OK,
        success_to_api_response(AuthResponse {
            user_id: user.user_id,
            name: user.name,
            token,
            expires_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 用户不存在和密码错误返回同样的错误
    let user = User::find_by_name(&state.pool, &req.name)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !user.verify_login(&req.password)? {
        tracing::debug!("Invalid password for user {}", user.user_id);
        return Err(AppError::Unauthorized);
    }

    let (token, expires_at) = generate_token(&user.user_id, &state.config)?;

    Ok((
        StatusCode::OK,
        success_to_api_response(AuthResponse {
            user_id: user.user_id,
            name: user.name,
            token,
            expires_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn me(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let user = User::find_by_id(&state.pool, claims.user_id()?)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    Ok((StatusCode::OK, success_to_api_response(user)))
}
