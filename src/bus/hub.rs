//! MessageHub：入站/出站两条有界队列 + 按通道标签扇出
//!
//! - 入站满时丢弃并记录（`publish` 返回 `HubError::InboundFull`），丢弃次数可通过 `dropped_inbound` 查询
//! - 出站满时 `send_outbound` 等待（背压），回复不会被静默丢弃
//! - 单个路由任务按发布顺序投递，同一标签内保持顺序；同一标签可有多个订阅者，各自收到全部消息

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::message::{InboundMessage, OutboundMessage};
use crate::config::BusSection;

/// 总线错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("inbound queue is full")]
    InboundFull,
    #[error("hub is closed")]
    Closed,
}

/// Hub 容量配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    /// 每个订阅者自己的缓冲
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 100,
            outbound_capacity: 100,
            subscriber_capacity: 100,
        }
    }
}

impl From<&BusSection> for HubConfig {
    fn from(s: &BusSection) -> Self {
        Self {
            inbound_capacity: s.inbound_capacity.max(1),
            outbound_capacity: s.outbound_capacity.max(1),
            subscriber_capacity: s.subscriber_capacity.max(1),
        }
    }
}

/// 消息中枢
pub struct MessageHub {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<OutboundMessage>>>>,
    subscriber_capacity: usize,
    dropped_inbound: AtomicU64,
}

impl MessageHub {
    pub fn new(config: HubConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            subscribers: RwLock::new(HashMap::new()),
            subscriber_capacity: config.subscriber_capacity.max(1),
            dropped_inbound: AtomicU64::new(0),
        }
    }

    /// 发布入站消息；队列满时丢弃并记录
    pub fn publish(&self, msg: InboundMessage) -> Result<(), HubError> {
        match self.inbound_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.dropped_inbound.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel = %msg.channel,
                    conversation = %msg.conversation_id,
                    "inbound queue full, dropping message"
                );
                Err(HubError::InboundFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::Closed),
        }
    }

    /// 因入站队列满而丢弃的消息数
    pub fn dropped_inbound(&self) -> u64 {
        self.dropped_inbound.load(Ordering::Relaxed)
    }

    /// 取走入站接收端（只有一个消费者，即 AgentLoop）
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// 投递出站消息；队列满时等待
    pub async fn send_outbound(&self, msg: OutboundMessage) -> Result<(), HubError> {
        self.outbound_tx.send(msg).await.map_err(|_| HubError::Closed)
    }

    /// 不等待的出站投递，用于关闭阶段的尽力通知
    pub fn try_send_outbound(&self, msg: OutboundMessage) -> bool {
        self.outbound_tx.try_send(msg).is_ok()
    }

    /// 订阅某个通道标签的出站消息；应在该通道的生产者启动前调用
    pub fn subscribe(&self, tag: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tag.to_string())
            .or_default()
            .push(tx);
        tracing::debug!(tag, "outbound subscriber registered");
        rx
    }

    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tag)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// 把一条出站消息交给该标签的所有订阅者；无订阅者时丢弃，已关闭的订阅者被移除
    pub async fn route(&self, msg: OutboundMessage) {
        // 先复制发送端再等待，避免持锁跨 await
        let targets: Vec<mpsc::Sender<OutboundMessage>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&msg.channel)
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            tracing::debug!(channel = %msg.channel, "no subscriber for outbound message, dropped");
            return;
        }

        let mut closed = false;
        for tx in &targets {
            if tx.send(msg.clone()).await.is_err() {
                closed = true;
            }
        }

        if closed {
            let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = subs.get_mut(&msg.channel) {
                list.retain(|tx| !tx.is_closed());
                tracing::debug!(channel = %msg.channel, remaining = list.len(), "pruned closed subscribers");
            }
        }
    }

    /// 启动路由任务：按顺序把出站队列中的消息路由给订阅者，直到取消或队列关闭
    pub fn spawn_router(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .outbound_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let hub = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(msg) => hub.route(msg).await,
                        None => break,
                    },
                }
            }
            // 关闭前把已排队的消息尽量送出（不等待满的订阅者）
            while let Ok(msg) = rx.try_recv() {
                let targets = hub
                    .subscribers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&msg.channel)
                    .cloned()
                    .unwrap_or_default();
                for tx in targets {
                    let _ = tx.try_send(msg.clone());
                }
            }
            tracing::debug!("outbound router stopped");
        }))
    }
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn out(tag: &str, text: &str) -> OutboundMessage {
        OutboundMessage::new(tag, "c1", text)
    }

    #[tokio::test]
    async fn test_route_preserves_order_within_tag() {
        let hub = Arc::new(MessageHub::default());
        let mut rx = hub.subscribe("x");
        let _router = hub.spawn_router(CancellationToken::new()).unwrap();

        hub.send_outbound(out("x", "A")).await.unwrap();
        hub.send_outbound(out("x", "B")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().text, "A");
        assert_eq!(rx.recv().await.unwrap().text, "B");
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber_of_tag() {
        let hub = MessageHub::default();
        let mut a = hub.subscribe("x");
        let mut tap = hub.subscribe("x");
        let mut other = hub.subscribe("y");

        hub.route(out("x", "hello")).await;

        assert_eq!(a.recv().await.unwrap().text, "hello");
        assert_eq!(tap.recv().await.unwrap().text, "hello");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let hub = MessageHub::default();
        let dropped = hub.subscribe("x");
        let mut live = hub.subscribe("x");
        drop(dropped);

        hub.route(out("x", "m")).await;
        assert_eq!(live.recv().await.unwrap().text, "m");
        assert_eq!(hub.subscriber_count("x"), 1);
    }

    #[tokio::test]
    async fn test_inbound_full_drops_and_counts() {
        let hub = MessageHub::new(HubConfig {
            inbound_capacity: 1,
            ..HubConfig::default()
        });
        hub.publish(InboundMessage::new("x", "u", "c1", "one")).unwrap();
        let err = hub.publish(InboundMessage::new("x", "u", "c1", "two")).unwrap_err();
        assert_eq!(err, HubError::InboundFull);
        assert_eq!(hub.dropped_inbound(), 1);

        let mut rx = hub.take_inbound().unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "one");
        assert!(hub.take_inbound().is_none());
    }

    #[tokio::test]
    async fn test_outbound_full_applies_back_pressure() {
        let hub = Arc::new(MessageHub::new(HubConfig {
            outbound_capacity: 1,
            ..HubConfig::default()
        }));
        hub.send_outbound(out("x", "first")).await.unwrap();

        // 路由任务未启动，第二条必须等待而不是丢弃
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), hub.send_outbound(out("x", "second"))).await;
        assert!(blocked.is_err());

        let mut rx = hub.subscribe("x");
        let _router = hub.spawn_router(CancellationToken::new()).unwrap();
        hub.send_outbound(out("x", "second")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "first");
        assert_eq!(rx.recv().await.unwrap().text, "second");
    }
}
