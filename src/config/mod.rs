use std::env;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use crate::crypto::KEY_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),

    #[error("ENCRYPTION_KEY must decode to exactly {KEY_SIZE} bytes, got {0} (generate with: openssl rand -base64 32)")]
    EncryptionKey(usize),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub encryption_key: Vec<u8>,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let jwt_expiration = optional("JWT_EXPIRATION")
            .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            redis_url: required("REDIS_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            rate_limit_window_secs: optional("RATE_LIMIT_WINDOW")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_requests: optional("RATE_LIMIT_REQUESTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: optional("SERVER_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            cors_origins: optional("CORS_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            encryption_key: decode_encryption_key(&required("ENCRYPTION_KEY")?)?,
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/santa_test".into(),
            redis_url: "redis://127.0.0.1/".into(),
            jwt_secret: "test-secret".into(),
            jwt_expiration_secs: 3600,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            cors_origins: Vec::new(),
            encryption_key: vec![42u8; KEY_SIZE],
        }
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// base64 解码；不是合法 base64 时按原始字符串处理
pub fn decode_encryption_key(value: &str) -> Result<Vec<u8>, ConfigError> {
    let key = match BASE64.decode(value.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("ENCRYPTION_KEY is not valid base64, using raw bytes");
            value.as_bytes().to_vec()
        }
    };

    if key.len() != KEY_SIZE {
        return Err(ConfigError::EncryptionKey(key.len()));
    }
    Ok(key)
}
