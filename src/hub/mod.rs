//! 在线连接注册表。
//!
//! 所有会话集合的修改都在同一个任务里按命令队列顺序执行：注册、注销、路由互相之间
//! 严格有序，因此注销处理之后不会再有消息投递到该会话。消息只投递给同一群组中
//! 属于这一对 (giver, receiver) 的会话。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// 会话出站队列中的一条消息（已序列化的 JSON）
pub type Outbound = Arc<str>;

/// 每个连接出站队列的容量，满了视为连接阻塞
pub const OUTBOUND_CAPACITY: usize = 256;

/// Hub 命令队列容量
pub const COMMAND_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub participant_id: Uuid,
    pub group_id: Uuid,
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    /// 返回会话和它的出站队列接收端；发送端交给 Hub 持有
    pub fn new(
        user_id: Uuid,
        participant_id: Uuid,
        group_id: Uuid,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let session = Self {
            session_id: Uuid::new_v4(),
            user_id,
            participant_id,
            group_id,
            outbound,
        };
        (session, rx)
    }

    /// 不延长队列生命周期的句柄，用于连接给自己回错误
    pub fn reply_handle(&self) -> mpsc::WeakSender<Outbound> {
        self.outbound.downgrade()
    }

    fn is_pair_member(&self, group_id: Uuid, giver_id: Uuid, receiver_id: Uuid) -> bool {
        self.group_id == group_id
            && (self.participant_id == giver_id || self.participant_id == receiver_id)
    }
}

#[derive(Debug)]
enum Command {
    Register(Session),
    Unregister(Uuid),
    Route {
        group_id: Uuid,
        giver_id: Uuid,
        receiver_id: Uuid,
        message: Outbound,
    },
    SessionCount(oneshot::Sender<usize>),
}

#[derive(Clone, Debug)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// 启动 Hub 主循环；所有 `Hub` 句柄被丢弃后循环退出
    pub fn spawn() -> Self {
        Self::with_capacity(COMMAND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (commands, rx) = mpsc::channel(capacity);
        tokio::spawn(run(rx));
        Self { commands }
    }

    pub async fn register(&self, session: Session) {
        self.send(Command::Register(session)).await;
    }

    pub async fn unregister(&self, session_id: Uuid) {
        self.send(Command::Unregister(session_id)).await;
    }

    /// 队列满时等待 Hub 处理，发送方因此受到背压
    pub async fn route(&self, message: Outbound, group_id: Uuid, giver_id: Uuid, receiver_id: Uuid) {
        self.send(Command::Route {
            group_id,
            giver_id,
            receiver_id,
            message,
        })
        .await;
    }

    /// 当前在线会话数。在它之前提交的命令都已处理完毕。
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SessionCount(tx)).await;
        rx.await.unwrap_or_default()
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::error!("Hub loop is not running, command dropped");
        }
    }
}

async fn run(mut commands: mpsc::Receiver<Command>) {
    let mut sessions: HashMap<Uuid, Session> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register(session) => {
                tracing::info!(
                    "Client registered: session={}, user={}, participant={}, group={}",
                    session.session_id,
                    session.user_id,
                    session.participant_id,
                    session.group_id
                );
                sessions.insert(session.session_id, session);
            }
            Command::Unregister(session_id) => {
                // 丢弃 Session 即关闭其出站队列
                if let Some(session) = sessions.remove(&session_id) {
                    tracing::info!(
                        "Client unregistered: session={}, user={}",
                        session_id,
                        session.user_id
                    );
                }
            }
            Command::Route {
                group_id,
                giver_id,
                receiver_id,
                message,
            } => {
                let mut evicted = Vec::new();
                for session in sessions
                    .values()
                    .filter(|s| s.is_pair_member(group_id, giver_id, receiver_id))
                {
                    if let Err(e) = session.outbound.try_send(message.clone()) {
                        tracing::warn!(
                            "Evicting session {}: outbound queue unavailable ({})",
                            session.session_id,
                            e
                        );
                        evicted.push(session.session_id);
                    }
                }
                for session_id in evicted {
                    sessions.remove(&session_id);
                }
            }
            Command::SessionCount(reply) => {
                let _ = reply.send(sessions.len());
            }
        }
    }

    tracing::info!("Hub loop stopped");
}
