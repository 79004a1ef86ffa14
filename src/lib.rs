use config::Config;
use crypto::MessageCipher;
use hub::Hub;
use sqlx::PgPool;

pub mod chat;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod matcher;
pub mod middleware;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub hub: Hub,
    pub cipher: MessageCipher,
}
