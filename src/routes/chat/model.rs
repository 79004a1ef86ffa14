use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::chat::store::{ChatStore, StoredMessage};
use crate::config::Config;
use crate::crypto::MessageCipher;
use crate::error::AppError;
use crate::routes::group::{Group, participant_id};
use crate::utils::verify_token;

/// 通过鉴权的 WebSocket 连接身份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionGrant {
    pub user_id: Uuid,
    pub participant_id: Uuid,
    pub group_id: Uuid,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UnreadCounts {
    pub unread_from_receiver: i64,
    pub unread_from_giver: i64,
    pub total: i64,
}

impl UnreadCounts {
    fn new(unread_from_receiver: i64, unread_from_giver: i64) -> Self {
        Self {
            unread_from_receiver,
            unread_from_giver,
            total: unread_from_receiver + unread_from_giver,
        }
    }
}

/// 升级前的检查：token 有效，群组存在，调用者是成员，且已经抽签
pub async fn authorize_connection(
    pool: &PgPool,
    config: &Config,
    group_id: Uuid,
    token: Option<&str>,
) -> Result<ConnectionGrant, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;
    let claims = verify_token(token, config).map_err(|e| {
        tracing::debug!("WebSocket token rejected: {}", e);
        AppError::Unauthorized
    })?;
    let user_id = claims.user_id()?;

    let group = Group::find_by_id(pool, group_id)
        .await?
        .ok_or(AppError::NotFound("group"))?;
    let participant = participant_id(pool, group.group_id, user_id).await?;
    if !group.is_drawn {
        return Err(AppError::DrawNotPerformed);
    }

    Ok(ConnectionGrant {
        user_id,
        participant_id: participant,
        group_id: group.group_id,
    })
}

/// 解密失败的消息用占位文本代替，不影响整段历史
fn to_plaintext(stored: StoredMessage, cipher: &MessageCipher) -> ChatMessage {
    ChatMessage {
        id: stored.message_id,
        giver_id: stored.giver_id,
        receiver_id: stored.receiver_id,
        from_giver: stored.from_giver,
        content: cipher.decrypt_or_placeholder(&stored.content),
        read_at: stored.read_at,
        created_at: stored.created_at,
    }
}

/// 把对方发来的未读消息标记为已读，再按时间顺序返回这一对的全部消息
async fn pair_history(
    pool: &PgPool,
    cipher: &MessageCipher,
    group_id: Uuid,
    giver_id: Uuid,
    receiver_id: Uuid,
    mark_from_giver: bool,
) -> Result<Vec<ChatMessage>, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE chat_messages SET read_at = NOW()
        WHERE group_id = $1 AND giver_id = $2 AND receiver_id = $3
          AND from_giver = $4 AND read_at IS NULL
        "#,
    )
    .bind(group_id)
    .bind(giver_id)
    .bind(receiver_id)
    .bind(mark_from_giver)
    .execute(&mut *tx)
    .await?;

    let messages = sqlx::query_as::<_, StoredMessage>(
        r#"
        SELECT message_id, group_id, giver_id, receiver_id, from_giver,
               content, read_at, created_at
        FROM chat_messages
        WHERE group_id = $1 AND giver_id = $2 AND receiver_id = $3
        ORDER BY created_at, message_id
        "#,
    )
    .bind(group_id)
    .bind(giver_id)
    .bind(receiver_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(messages
        .into_iter()
        .map(|m| to_plaintext(m, cipher))
        .collect())
}

/// 以送礼人身份查看与收礼人的对话
pub async fn history_as_giver(
    pool: &PgPool,
    cipher: &MessageCipher,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<ChatMessage>, AppError> {
    let me = participant_id(pool, group_id, user_id).await?;
    let receiver_id = pool
        .receiver_of(group_id, me)
        .await?
        .ok_or(AppError::DrawNotPerformed)?;

    pair_history(pool, cipher, group_id, me, receiver_id, false).await
}

/// 以收礼人身份查看与送礼人的对话
pub async fn history_as_receiver(
    pool: &PgPool,
    cipher: &MessageCipher,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<ChatMessage>, AppError> {
    let me = participant_id(pool, group_id, user_id).await?;
    let giver_id = pool
        .giver_of(group_id, me)
        .await?
        .ok_or(AppError::DrawNotPerformed)?;

    pair_history(pool, cipher, group_id, giver_id, me, true).await
}

pub async fn unread_counts(
    pool: &PgPool,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<UnreadCounts, AppError> {
    let me = participant_id(pool, group_id, user_id).await?;

    let (from_receiver, from_giver): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE giver_id = $2 AND NOT from_giver),
            COUNT(*) FILTER (WHERE receiver_id = $2 AND from_giver)
        FROM chat_messages
        WHERE group_id = $1 AND read_at IS NULL
        "#,
    )
    .bind(group_id)
    .bind(me)
    .fetch_one(pool)
    .await?;

    Ok(UnreadCounts::new(from_receiver, from_giver))
}
