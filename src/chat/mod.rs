//! 匿名聊天：消息格式、持久化接口、每个连接的读写循环。

pub mod relay;
pub mod store;
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 发送者在这一对中的身份
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "santa")]
    Giver,
    #[serde(alias = "giftee")]
    Receiver,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub content: String,
    pub role: Role,
}

/// 发给客户端的消息（明文）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub giver_id: Uuid,
    pub receiver_id: Uuid,
    pub from_giver: bool,
    pub content: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
