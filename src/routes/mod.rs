pub mod chat;
pub mod exclusion;
pub mod group;
pub mod health;
pub mod user;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    AppState,
    config::Config,
    middleware::{auth_middleware, log_errors},
};

/// 组装所有路由。限流层依赖 Redis，由调用方另外添加。
pub fn build_router(state: AppState) -> Router {
    // 将路由分为公开路由和受保护路由
    let public_routes = Router::new()
        .route("/users/register", post(user::register))
        .route("/users/login", post(user::login))
        // WebSocket 自己校验查询参数里的 token
        .route("/chat/ws", get(chat::ws_handler))
        .route("/health", get(health::health));

    let protected_routes = Router::new()
        .route("/users/me", get(user::me))
        // 群组路由
        .route("/groups/create", post(group::create_group))
        .route("/groups/mine", get(group::my_groups))
        .route("/groups/by-id", get(group::find_by_id))
        .route("/groups/join", post(group::join_group))
        .route("/groups/delete", post(group::delete_group))
        .route("/groups/draw", post(group::draw))
        .route("/groups/my-assignment", get(group::my_assignment))
        // 排除规则路由
        .route("/exclusions/list", get(exclusion::list_exclusions))
        .route("/exclusions/create", post(exclusion::create_exclusion))
        .route("/exclusions/delete", post(exclusion::delete_exclusion))
        // 聊天记录路由
        .route("/chat/with-receiver", get(chat::with_receiver))
        .route("/chat/with-giver", get(chat::with_giver))
        .route("/chat/unread", get(chat::unread))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn(log_errors))
        .layer(cors)
        .with_state(state)
}

/// 未配置来源时：调试构建全部放行，发布构建不允许跨域
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    if cfg!(debug_assertions) {
        tracing::debug!("Adding permissive CORS layer for development mode");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}
