use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::Utc;
use futures::{Sink, StreamExt};
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use uuid::Uuid;

use santa_backend::chat::ChatMessage;
use santa_backend::chat::relay::{
    self, MAX_MESSAGE_SIZE, PING_PERIOD, PONG_WAIT, Peer, RelayError, WRITE_WAIT,
};
use santa_backend::chat::store::{ChatStore, NewChatMessage, StoredMessage};
use santa_backend::crypto::MessageCipher;
use santa_backend::hub::{Hub, OUTBOUND_CAPACITY, Session};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Inner {
    assignments: Mutex<Vec<(Uuid, Uuid, Uuid)>>,
    messages: Mutex<Vec<StoredMessage>>,
}

#[derive(Clone, Default)]
struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    fn assign(&self, group_id: Uuid, giver_id: Uuid, receiver_id: Uuid) {
        self.inner
            .assignments
            .lock()
            .unwrap()
            .push((group_id, giver_id, receiver_id));
    }

    fn messages(&self) -> Vec<StoredMessage> {
        self.inner.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn receiver_of(&self, group_id: Uuid, giver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        Ok(self
            .inner
            .assignments
            .lock()
            .unwrap()
            .iter()
            .find(|(g, giver, _)| *g == group_id && *giver == giver_id)
            .map(|(_, _, receiver)| *receiver))
    }

    async fn giver_of(&self, group_id: Uuid, receiver_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        Ok(self
            .inner
            .assignments
            .lock()
            .unwrap()
            .iter()
            .find(|(g, _, receiver)| *g == group_id && *receiver == receiver_id)
            .map(|(_, giver, _)| *giver))
    }

    async fn insert_message(&self, message: NewChatMessage) -> Result<StoredMessage, sqlx::Error> {
        let stored = StoredMessage {
            message_id: Uuid::new_v4(),
            group_id: message.group_id,
            giver_id: message.giver_id,
            receiver_id: message.receiver_id,
            from_giver: message.from_giver,
            content: message.content,
            read_at: None,
            created_at: Utc::now(),
        };
        self.inner.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

struct Client {
    tx: UnboundedSender<Result<Message, Infallible>>,
    rx: UnboundedReceiver<Message>,
    task: JoinHandle<()>,
}

impl Client {
    fn connect(
        hub: &Hub,
        store: &MemoryStore,
        cipher: &MessageCipher,
        group_id: Uuid,
        participant_id: Uuid,
    ) -> Self {
        let (tx, server_rx) = unbounded();
        let (server_tx, rx) = unbounded();
        let (session, outbound) =
            Session::new(Uuid::new_v4(), participant_id, group_id, OUTBOUND_CAPACITY);

        let task = tokio::spawn(relay::serve(
            server_tx,
            server_rx,
            session,
            outbound,
            hub.clone(),
            store.clone(),
            cipher.clone(),
        ));

        Self { tx, rx, task }
    }

    fn send_text(&self, text: String) {
        self.tx.unbounded_send(Ok(Message::Text(text.into()))).unwrap();
    }

    fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    async fn recv_text(&mut self) -> String {
        match timeout(RECV_TIMEOUT, self.rx.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
        {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    async fn recv_chat(&mut self) -> ChatMessage {
        serde_json::from_str(&self.recv_text().await).unwrap()
    }
}

fn cipher() -> MessageCipher {
    MessageCipher::new(&[3u8; 32]).unwrap()
}

async fn wait_for_sessions(hub: &Hub, expected: usize) {
    for _ in 0..200 {
        if hub.session_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} live sessions", expected);
}

#[tokio::test]
async fn test_pair_members_receive_relayed_message() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();
    let (group, giver, receiver, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.assign(group, giver, receiver);
    store.assign(group, receiver, other);

    let mut giver_client = Client::connect(&hub, &store, &cipher, group, giver);
    let mut receiver_client = Client::connect(&hub, &store, &cipher, group, receiver);
    let mut other_client = Client::connect(&hub, &store, &cipher, group, other);
    wait_for_sessions(&hub, 3).await;

    giver_client.send_json(json!({ "content": "hello", "role": "giver" }));

    let at_giver = giver_client.recv_chat().await;
    let at_receiver = receiver_client.recv_chat().await;
    assert_eq!(at_giver, at_receiver);
    assert_eq!(at_giver.content, "hello");
    assert_eq!(at_giver.giver_id, giver);
    assert_eq!(at_giver.receiver_id, receiver);
    assert!(at_giver.from_giver);

    // 同组其他参与者收不到
    assert!(other_client.rx.try_recv().is_err());

    // 只有密文落库
    let stored = store.messages();
    assert_eq!(stored.len(), 1);
    assert_ne!(stored[0].content, "hello");
    assert_eq!(cipher.decrypt(&stored[0].content).unwrap(), "hello");
}

#[tokio::test]
async fn test_receiver_reply_uses_santa_alias_pair() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();
    let (group, giver, receiver) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.assign(group, giver, receiver);

    let mut giver_client = Client::connect(&hub, &store, &cipher, group, giver);
    let mut receiver_client = Client::connect(&hub, &store, &cipher, group, receiver);
    wait_for_sessions(&hub, 2).await;

    receiver_client.send_json(json!({ "content": "thank you santa", "role": "giftee" }));

    let message = giver_client.recv_chat().await;
    assert_eq!(message.content, "thank you santa");
    assert!(!message.from_giver);
    assert_eq!((message.giver_id, message.receiver_id), (giver, receiver));
    assert_eq!(receiver_client.recv_chat().await.id, message.id);
}

#[tokio::test]
async fn test_message_without_assignment_is_discarded() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();

    let mut client = Client::connect(&hub, &store, &cipher, Uuid::new_v4(), Uuid::new_v4());
    wait_for_sessions(&hub, 1).await;

    client.send_json(json!({ "content": "hello", "role": "giver" }));
    // 空消息会得到错误回复，说明前一条已经处理完
    client.send_json(json!({ "content": "   ", "role": "giver" }));

    let reply: serde_json::Value = serde_json::from_str(&client.recv_text().await).unwrap();
    assert!(reply["error"].as_str().unwrap().starts_with("Invalid message"));

    assert!(store.messages().is_empty());
    assert_eq!(hub.session_count().await, 1);
    assert!(!client.task.is_finished());
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();
    let (group, giver, receiver) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    store.assign(group, giver, receiver);

    let mut client = Client::connect(&hub, &store, &cipher, group, giver);
    wait_for_sessions(&hub, 1).await;

    client.send_text("not json".into());
    client.send_json(json!({ "content": "hi", "role": "elf" }));
    client
        .tx
        .unbounded_send(Ok(Message::Binary(vec![0xff, 0xfe].into())))
        .unwrap();
    client.send_json(json!({ "content": "still here", "role": "giver" }));

    let message = client.recv_chat().await;
    assert_eq!(message.content, "still here");
    assert_eq!(store.messages().len(), 1);
}

#[tokio::test]
async fn test_client_disconnect_unregisters_and_closes() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();

    let Client { tx, mut rx, task } =
        Client::connect(&hub, &store, &cipher, Uuid::new_v4(), Uuid::new_v4());
    wait_for_sessions(&hub, 1).await;

    drop(tx);
    timeout(RECV_TIMEOUT, task).await.unwrap().unwrap();

    assert_eq!(hub.session_count().await, 0);
    assert!(matches!(rx.next().await, Some(Message::Close(_))));
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();

    let client = Client::connect(&hub, &store, &cipher, Uuid::new_v4(), Uuid::new_v4());
    wait_for_sessions(&hub, 1).await;

    client.send_text("x".repeat(MAX_MESSAGE_SIZE + 1));
    timeout(RECV_TIMEOUT, client.task).await.unwrap().unwrap();

    assert_eq!(hub.session_count().await, 0);
    assert!(store.messages().is_empty());
}

#[tokio::test]
async fn test_handle_payload_rejects_prohibited_content() {
    let store = MemoryStore::default();
    let peer = Peer {
        session_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        participant_id: Uuid::new_v4(),
        group_id: Uuid::new_v4(),
    };
    store.assign(peer.group_id, peer.participant_id, Uuid::new_v4());

    let result = relay::handle_payload(
        r#"{"content":"<script>alert(1)</script>","role":"giver"}"#,
        &peer,
        &store,
        &cipher(),
    )
    .await;

    assert!(matches!(result, Err(RelayError::Invalid(_))));
    assert!(store.messages().is_empty());
}

// 以下用例使用暂停的时钟，运行时空闲时自动推进到下一个定时器

#[tokio::test(start_paused = true)]
async fn test_idle_connection_pinged_then_closed_after_read_deadline() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();
    let start = Instant::now();

    let mut client = Client::connect(&hub, &store, &cipher, Uuid::new_v4(), Uuid::new_v4());
    wait_for_sessions(&hub, 1).await;

    let frame = timeout(PING_PERIOD + Duration::from_secs(1), client.rx.next())
        .await
        .unwrap();
    assert!(matches!(frame, Some(Message::Ping(_))));
    assert!(start.elapsed() >= PING_PERIOD);
    assert!(!client.task.is_finished());

    // 客户端一直没有发送任何帧，读超时后连接关闭
    let frame = timeout(PONG_WAIT, client.rx.next()).await.unwrap();
    assert!(matches!(frame, Some(Message::Close(_))));
    timeout(WRITE_WAIT, &mut client.task).await.unwrap().unwrap();

    assert!(start.elapsed() >= PONG_WAIT);
    assert_eq!(hub.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_any_inbound_frame_refreshes_read_deadline() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();

    let client = Client::connect(&hub, &store, &cipher, Uuid::new_v4(), Uuid::new_v4());
    wait_for_sessions(&hub, 1).await;

    tokio::time::sleep(Duration::from_secs(50)).await;
    client.tx.unbounded_send(Ok(Message::Pong(Bytes::new()))).unwrap();

    // 距连接建立已超过 PONG_WAIT，但距上一帧没有
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!client.task.is_finished());
    assert_eq!(hub.session_count().await, 1);

    tokio::time::sleep(PONG_WAIT).await;
    assert!(client.task.is_finished());
    assert_eq!(hub.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_messages_coalesced_into_one_frame() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let cipher = cipher();
    let (group, giver, receiver) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let mut client = Client::connect(&hub, &store, &cipher, group, giver);
    wait_for_sessions(&hub, 1).await;

    // 不让出执行权，Hub 处理命令时写循环还没有机会取走队列
    for n in 0..5 {
        hub.route(Arc::from(json!({ "n": n }).to_string()), group, giver, receiver)
            .await;
    }

    let frame = client.recv_text().await;
    let lines: Vec<serde_json::Value> = frame
        .split('\n')
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 5);
    for (n, line) in lines.iter().enumerate() {
        assert_eq!(line["n"], n);
    }
}

/// 永远不可写的连接
struct StalledSink;

impl Sink<Message> for StalledSink {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Infallible> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_write_ends_session_after_write_deadline() {
    let hub = Hub::spawn();
    let store = MemoryStore::default();
    let (group, giver, receiver) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let (_client_tx, server_rx) = unbounded::<Result<Message, Infallible>>();
    let (session, outbound) = Session::new(Uuid::new_v4(), giver, group, OUTBOUND_CAPACITY);
    let task = tokio::spawn(relay::serve(
        StalledSink,
        server_rx,
        session,
        outbound,
        hub.clone(),
        store,
        cipher(),
    ));
    wait_for_sessions(&hub, 1).await;

    let start = Instant::now();
    hub.route(Arc::from("{}"), group, giver, receiver).await;

    timeout(PONG_WAIT, task).await.unwrap().unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= WRITE_WAIT);
    assert!(elapsed < PONG_WAIT);
    assert_eq!(hub.session_count().await, 0);
}
