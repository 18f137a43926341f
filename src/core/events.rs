//! 进程内事件总线：avatar 之间的异步通知（发出即忘）
//!
//! 一个无界 FIFO 队列 + 一个消费任务。publish 从不阻塞；每条消息同时投递给按收件人订阅的和按类型订阅的订阅者。
//! 单个订阅者出错或 panic 只记日志，不影响其他订阅者和后续消息。
//! shutdown：先拒绝新消息，再把已入队的消息投递完，然后停止消费任务。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 内部消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalMessage {
    /// 发送方 avatar id
    pub sender: String,
    /// 收件人 avatar id；为空表示只按类型投递
    pub recipient: Option<String>,
    /// 类型标签，如 email_ignored
    pub message_type: String,
    pub payload: Map<String, Value>,
}

impl InternalMessage {
    pub fn new(sender: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            recipient: None,
            message_type: message_type.into(),
            payload: Map::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// 订阅键：按收件人或按消息类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Recipient(String),
    Type(String),
}

/// 订阅者
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, message: &InternalMessage) -> Result<(), String>;
}

struct FnSubscriber<F>(F);

#[async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&InternalMessage) -> Result<(), String> + Send + Sync,
{
    async fn on_message(&self, message: &InternalMessage) -> Result<(), String> {
        (self.0)(message)
    }
}

type SubscriberTable = HashMap<SubscriptionKey, Vec<(Uuid, Arc<dyn Subscriber>)>>;

/// 事件总线
pub struct EventBus {
    tx: mpsc::UnboundedSender<InternalMessage>,
    subscribers: Arc<RwLock<SubscriberTable>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// 创建总线并启动消费任务（需在 tokio 运行时内调用）
    pub fn start() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribers: Arc<RwLock<SubscriberTable>> = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(consume(rx, Arc::clone(&subscribers), cancel.clone()));
        Arc::new(Self {
            tx,
            subscribers,
            closed: AtomicBool::new(false),
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// 入队消息；总线已关闭时记录日志并丢弃，返回 false
    pub fn publish(&self, message: InternalMessage) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(message_type = %message.message_type, "event bus is shut down, dropping message");
            return false;
        }
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(message_type = %e.0.message_type, "event bus queue closed, dropping message");
                false
            }
        }
    }

    pub async fn subscribe(&self, key: SubscriptionKey, subscriber: Arc<dyn Subscriber>) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .await
            .entry(key)
            .or_default()
            .push((id, subscriber));
        id
    }

    /// 以闭包订阅
    pub async fn subscribe_fn<F>(&self, key: SubscriptionKey, f: F) -> Uuid
    where
        F: Fn(&InternalMessage) -> Result<(), String> + Send + Sync + 'static,
    {
        self.subscribe(key, Arc::new(FnSubscriber(f))).await
    }

    /// 取消订阅；返回是否找到
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut table = self.subscribers.write().await;
        let mut found = false;
        for subs in table.values_mut() {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id);
            found |= subs.len() != before;
        }
        table.retain(|_, subs| !subs.is_empty());
        found
    }

    /// 关闭总线并投递完已入队的消息；可重复调用
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "event bus worker terminated abnormally");
            }
        }
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<InternalMessage>,
    subscribers: Arc<RwLock<SubscriberTable>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Some(message) => dispatch(&subscribers, message).await,
                None => break,
            },
            _ = cancel.cancelled() => {
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    dispatch(&subscribers, message).await;
                }
                break;
            }
        }
    }
    tracing::debug!("event bus worker stopped");
}

async fn dispatch(subscribers: &RwLock<SubscriberTable>, message: InternalMessage) {
    let targets: Vec<Arc<dyn Subscriber>> = {
        let table = subscribers.read().await;
        let by_recipient = message
            .recipient
            .as_ref()
            .and_then(|r| table.get(&SubscriptionKey::Recipient(r.clone())));
        let by_type = table.get(&SubscriptionKey::Type(message.message_type.clone()));
        by_recipient
            .into_iter()
            .chain(by_type)
            .flatten()
            .map(|(_, s)| Arc::clone(s))
            .collect()
    };

    for subscriber in targets {
        match AssertUnwindSafe(subscriber.on_message(&message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(
                message_type = %message.message_type,
                error = %e,
                "event subscriber failed"
            ),
            Err(_) => tracing::error!(message_type = %message.message_type, "event subscriber panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&InternalMessage) -> Result<(), String> + Send + Sync + 'static) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |m: &InternalMessage| {
            sink.lock().unwrap().push(format!("{}:{}", m.sender, m.message_type));
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_recipient_and_type_delivery() {
        let bus = EventBus::start();
        let (to_bob, f1) = recorder();
        let (ignored, f2) = recorder();
        bus.subscribe_fn(SubscriptionKey::Recipient("bob".into()), f1).await;
        bus.subscribe_fn(SubscriptionKey::Type("email_ignored".into()), f2).await;

        assert!(bus.publish(InternalMessage::new("alice", "hello").with_recipient("bob")));
        assert!(bus.publish(InternalMessage::new("alice", "email_ignored").with_field("from", "spam@x")));
        assert!(bus.publish(InternalMessage::new("carol", "email_ignored").with_recipient("bob")));
        bus.shutdown().await;

        assert_eq!(*to_bob.lock().unwrap(), vec!["alice:hello", "carol:email_ignored"]);
        assert_eq!(*ignored.lock().unwrap(), vec!["alice:email_ignored", "carol:email_ignored"]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_isolated() {
        let bus = EventBus::start();
        let key = SubscriptionKey::Type("ping".into());
        bus.subscribe_fn(key.clone(), |_| Err("nope".to_string())).await;
        bus.subscribe_fn(key.clone(), |m| {
            if m.sender == "boom" {
                panic!("subscriber panic");
            }
            Ok(())
        })
        .await;
        let (seen, f) = recorder();
        bus.subscribe_fn(key, f).await;

        bus.publish(InternalMessage::new("boom", "ping"));
        bus.publish(InternalMessage::new("ok", "ping"));
        bus.shutdown().await;

        assert_eq!(*seen.lock().unwrap(), vec!["boom:ping", "ok:ping"]);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_dropped() {
        let bus = EventBus::start();
        let (seen, f) = recorder();
        bus.subscribe_fn(SubscriptionKey::Type("late".into()), f).await;
        bus.shutdown().await;
        assert!(!bus.publish(InternalMessage::new("a", "late")));
        bus.shutdown().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::start();
        let (seen, f) = recorder();
        let id = bus.subscribe_fn(SubscriptionKey::Type("x".into()), f).await;
        assert!(bus.unsubscribe(id).await);
        assert!(!bus.unsubscribe(id).await);
        bus.publish(InternalMessage::new("a", "x"));
        bus.shutdown().await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
