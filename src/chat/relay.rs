//! 每个 WebSocket 连接的读写循环。
//!
//! 读循环解析客户端消息，确定配对，加密落库后把明文交给 Hub 转发；写循环把 Hub
//! 投递到出站队列的消息写回连接，并定时发送 ping。任意一边结束都会注销会话并
//! 结束另一边。

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use uuid::Uuid;

use super::store::{ChatStore, NewChatMessage};
use super::validate::{ValidationError, clean_message};
use super::{ChatMessage, IncomingMessage, Role};
use crate::crypto::{CryptoError, MessageCipher};
use crate::hub::{Hub, Outbound, Session};

/// 写超时
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// 读超时，期间收到任何帧都会重新计时
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// ping 间隔，必须小于 PONG_WAIT
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// 单条入站消息上限
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid message format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to encrypt message: {0}")]
    Crypto(#[from] CryptoError),

    #[error("failed to store message: {0}")]
    Store(#[from] sqlx::Error),
}

/// 连接的身份信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub participant_id: Uuid,
    pub group_id: Uuid,
}

impl From<&Session> for Peer {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id,
            user_id: session.user_id,
            participant_id: session.participant_id,
            group_id: session.group_id,
        }
    }
}

struct Connection {
    peer: Peer,
    reply: mpsc::WeakSender<Outbound>,
}

impl Connection {
    /// 错误只回给发送者自己
    fn reply_error(&self, error: &str) {
        let Some(tx) = self.reply.upgrade() else {
            return;
        };
        let body = serde_json::json!({ "error": error }).to_string();
        if tx.try_send(Arc::from(body)).is_err() {
            tracing::debug!(
                "Dropped error reply for session {}: queue unavailable",
                self.peer.session_id
            );
        }
    }
}

/// 处理一条入站消息。
///
/// 返回 `Ok(None)` 表示该参与者还没有配对，消息被丢弃且不落库。
pub async fn handle_payload<S>(
    payload: &str,
    peer: &Peer,
    store: &S,
    cipher: &MessageCipher,
) -> Result<Option<ChatMessage>, RelayError>
where
    S: ChatStore + ?Sized,
{
    let incoming: IncomingMessage = serde_json::from_str(payload)?;
    let content = clean_message(&incoming.content)?;

    let (giver_id, receiver_id) = match incoming.role {
        Role::Giver => match store.receiver_of(peer.group_id, peer.participant_id).await? {
            Some(receiver_id) => (peer.participant_id, receiver_id),
            None => {
                tracing::debug!(
                    "Draw not performed yet for participant {}",
                    peer.participant_id
                );
                return Ok(None);
            }
        },
        Role::Receiver => match store.giver_of(peer.group_id, peer.participant_id).await? {
            Some(giver_id) => (giver_id, peer.participant_id),
            None => {
                tracing::debug!("No giver found for participant {}", peer.participant_id);
                return Ok(None);
            }
        },
    };

    // 只有密文落库
    let stored = store
        .insert_message(NewChatMessage {
            group_id: peer.group_id,
            giver_id,
            receiver_id,
            from_giver: incoming.role == Role::Giver,
            content: cipher.encrypt(&content)?,
        })
        .await?;

    Ok(Some(ChatMessage {
        id: stored.message_id,
        giver_id,
        receiver_id,
        from_giver: stored.from_giver,
        content,
        read_at: stored.read_at,
        created_at: stored.created_at,
    }))
}

/// 运行一个已鉴权连接直到断开。
///
/// `session` 在这里注册到 Hub，返回前一定会注销。
pub async fn serve<W, R, E, S>(
    sink: W,
    mut stream: R,
    session: Session,
    outbound: mpsc::Receiver<Outbound>,
    hub: Hub,
    store: S,
    cipher: MessageCipher,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    S: ChatStore,
{
    let conn = Connection {
        peer: Peer::from(&session),
        reply: session.reply_handle(),
    };
    let session_id = conn.peer.session_id;
    hub.register(session).await;

    let mut write_task = tokio::spawn(write_loop(sink, outbound, session_id));

    let writer_done = tokio::select! {
        _ = read_loop(&mut stream, &conn, &hub, &store, &cipher) => false,
        _ = &mut write_task => true,
    };

    // 注销会关闭出站队列，写循环随后发送 close 帧退出
    hub.unregister(session_id).await;
    if !writer_done && timeout(WRITE_WAIT, &mut write_task).await.is_err() {
        write_task.abort();
    }

    tracing::debug!("Connection closed: session={}", session_id);
}

async fn read_loop<R, E, S>(
    stream: &mut R,
    conn: &Connection,
    hub: &Hub,
    store: &S,
    cipher: &MessageCipher,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    S: ChatStore,
{
    let session_id = conn.peer.session_id;

    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                tracing::info!("Read deadline exceeded: session={}", session_id);
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                tracing::warn!("WebSocket error: session={}, {}", session_id, e);
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Non utf-8 binary frame ignored: session={}", session_id);
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return,
        };

        if payload.len() > MAX_MESSAGE_SIZE {
            tracing::warn!(
                "Message of {} bytes exceeds limit, closing session {}",
                payload.len(),
                session_id
            );
            return;
        }

        match handle_payload(&payload, &conn.peer, store, cipher).await {
            Ok(Some(message)) => match serde_json::to_string(&message) {
                Ok(json) => {
                    hub.route(
                        Arc::from(json),
                        conn.peer.group_id,
                        message.giver_id,
                        message.receiver_id,
                    )
                    .await
                }
                Err(e) => tracing::error!("Failed to serialize chat message: {}", e),
            },
            Ok(None) => {}
            Err(RelayError::Invalid(e)) => {
                tracing::warn!("Message validation failed: session={}, {}", session_id, e);
                conn.reply_error(&format!("Invalid message: {}", e));
            }
            Err(e) => {
                tracing::warn!("Message skipped: session={}, {}", session_id, e);
            }
        }
    }
}

async fn write_loop<W>(mut sink: W, mut outbound: mpsc::Receiver<Outbound>, session_id: Uuid)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(first) = next else {
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    return;
                };

                // 合并队列里已有的消息，一次写出，按行分隔
                let mut frame = String::from(&*first);
                while let Ok(more) = outbound.try_recv() {
                    frame.push('\n');
                    frame.push_str(&more);
                }

                if !send_with_deadline(&mut sink, Message::Text(frame.into()), session_id).await {
                    return;
                }
            }
            _ = ping.tick() => {
                if !send_with_deadline(&mut sink, Message::Ping(Bytes::new()), session_id).await {
                    return;
                }
            }
        }
    }
}

async fn send_with_deadline<W>(sink: &mut W, message: Message, session_id: Uuid) -> bool
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!("Write failed: session={}, {}", session_id, e);
            false
        }
        Err(_) => {
            tracing::warn!("Write deadline exceeded: session={}", session_id);
            false
        }
    }
}
