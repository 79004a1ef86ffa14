use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub group_id: Uuid,
    pub giver_id: Uuid,
    pub receiver_id: Uuid,
    pub from_giver: bool,
    /// 密文
    pub content: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredMessage {
    pub message_id: Uuid,
    pub group_id: Uuid,
    pub giver_id: Uuid,
    pub receiver_id: Uuid,
    pub from_giver: bool,
    pub content: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 聊天转发需要的持久化操作
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// 该参与者抽到的收礼人
    async fn receiver_of(&self, group_id: Uuid, giver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;

    /// 抽到该参与者的送礼人
    async fn giver_of(&self, group_id: Uuid, receiver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;

    async fn insert_message(&self, message: NewChatMessage) -> Result<StoredMessage, sqlx::Error>;
}

#[async_trait]
impl ChatStore for PgPool {
    async fn receiver_of(&self, group_id: Uuid, giver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT receiver_id FROM assignments
            WHERE group_id = $1 AND giver_id = $2
            "#,
        )
        .bind(group_id)
        .bind(giver_id)
        .fetch_optional(self)
        .await
    }

    async fn giver_of(&self, group_id: Uuid, receiver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT giver_id FROM assignments
            WHERE group_id = $1 AND receiver_id = $2
            "#,
        )
        .bind(group_id)
        .bind(receiver_id)
        .fetch_optional(self)
        .await
    }

    async fn insert_message(&self, message: NewChatMessage) -> Result<StoredMessage, sqlx::Error> {
        sqlx::query_as::<_, StoredMessage>(
            r#"
            INSERT INTO chat_messages (
                message_id, group_id, giver_id, receiver_id, from_giver, content, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING
                message_id, group_id, giver_id, receiver_id, from_giver,
                content, read_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.group_id)
        .bind(message.giver_id)
        .bind(message.receiver_id)
        .bind(message.from_giver)
        .bind(message.content)
        .fetch_one(self)
        .await
    }
}
