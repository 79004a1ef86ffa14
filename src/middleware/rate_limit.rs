use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use redis::AsyncCommands;

use crate::{config::Config, error::AppError};

const KEY_PREFIX: &str = "rate_limit:";

/// 基于 Redis 的固定窗口限流，按客户端 IP 计数
#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    window_secs: u64,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(redis: redis::Client, config: &Config) -> Self {
        Self {
            redis: Arc::new(redis),
            window_secs: config.rate_limit_window().as_secs(),
            max_requests: config.rate_limit_requests,
        }
    }

    /// 计数加一，返回当前窗口内的请求数
    async fn hit(&self, ip: &str) -> Result<u64, redis::RedisError> {
        let key = format!("{}{}", KEY_PREFIX, ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let count: u64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, self.window_secs as i64).await?;
        }
        Ok(count)
    }

    pub async fn check(&self, ip: &str) -> Result<(), AppError> {
        match self.hit(ip).await {
            Ok(count) if count > u64::from(self.max_requests) => {
                tracing::warn!("Rate limit exceeded: ip={}, count={}", ip, count);
                Err(AppError::RateLimited(self.window_secs))
            }
            Ok(_) => Ok(()),
            // Redis 不可用时放行
            Err(e) => {
                tracing::warn!("Rate limiter unavailable, allowing request: {}", e);
                Ok(())
            }
        }
    }
}

/// 优先取反向代理头，否则用连接地址
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
                .map(str::to_string)
        })
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(req.headers(), remote);

    limiter.check(&ip).await?;
    Ok(next.run(req).await)
}
