//! 总线消息格式
//!
//! 所有通道（控制台、Telegram）与触发器（cron 以任务所属会话的通道发出，heartbeat 用保留标签）产生 InboundMessage，
//! Agent 的回复以 OutboundMessage 形式按通道标签路由回去。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::session::SessionKey;

/// 心跳使用的保留通道标签
pub const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// 运行完成回执：触发器用它判断上一次触发的运行是否结束
#[derive(Debug, Clone)]
pub struct RunAck(Arc<AtomicBool>);

impl RunAck {
    /// 新建一个"进行中"的回执
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 标记运行结束（成功、失败、被拒绝都算）
    pub fn complete(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunAck {
    fn default() -> Self {
        Self::new()
    }
}

/// 入站消息：通道或触发器产生
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// 来源通道标签（如 console、telegram、cron）
    pub channel: String,
    pub sender_id: String,
    /// 会话 ID（Telegram 为 chat id）
    pub conversation_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// 触发器附带的完成回执
    pub ack: Option<RunAck>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
            ack: None,
        }
    }

    pub fn with_ack(mut self, ack: RunAck) -> Self {
        self.ack = Some(ack);
        self
    }

    /// 会话键：通道 + 会话 ID
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.channel, &self.conversation_id)
    }

    /// 完成回执（若有）
    pub fn complete_ack(&self) {
        if let Some(ack) = &self.ack {
            ack.complete();
        }
    }
}

/// 出站消息：投递到 channel 标签对应的订阅者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub conversation_id: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            conversation_id: conversation_id.into(),
            text: text.into(),
        }
    }

    /// 回复某条入站消息
    pub fn reply_to(msg: &InboundMessage, text: impl Into<String>) -> Self {
        Self::new(&msg.channel, &msg.conversation_id, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_lifecycle() {
        let ack = RunAck::new();
        let msg = InboundMessage::new(HEARTBEAT_CHANNEL, "heartbeat", "heartbeat", "tick").with_ack(ack.clone());
        assert!(ack.is_pending());
        msg.complete_ack();
        assert!(!ack.is_pending());
    }

    #[test]
    fn test_reply_keeps_routing_fields() {
        let msg = InboundMessage::new("telegram", "u1", "chat-9", "hi");
        let out = OutboundMessage::reply_to(&msg, "hello");
        assert_eq!(out.channel, "telegram");
        assert_eq!(out.conversation_id, "chat-9");
        assert_eq!(msg.session_key().to_string(), "telegram:chat-9");
    }
}
