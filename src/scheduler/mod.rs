//! 定时触发器：cron 任务与心跳
//!
//! 触发器和通道一样只是生产者：合成 InboundMessage 发布到 Hub，照常经过会话串行与 busy 策略。
//! 每个触发源持有一个 TriggerSlot，上一次触发的运行尚未结束时跳过本次 tick，不会无限堆积。

pub mod cron;
pub mod heartbeat;

use crate::bus::{InboundMessage, MessageHub, RunAck};

pub use self::cron::{CronJob, CronService, Schedule};
pub use heartbeat::HeartbeatService;

/// 一次触发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Published,
    /// 上一次运行尚未结束
    Skipped,
    /// Hub 拒收（入站队列满或已关闭）
    Dropped,
}

/// 触发槽：记住上一次发布的回执
#[derive(Debug, Clone, Default)]
pub struct TriggerSlot {
    last: Option<RunAck>,
}

impl TriggerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上一次触发的运行是否仍在进行
    pub fn is_busy(&self) -> bool {
        self.last.as_ref().map(RunAck::is_pending).unwrap_or(false)
    }

    /// 空闲时附上新回执并发布；发布失败时立即完成回执，下次 tick 可以重试
    pub fn fire(&mut self, hub: &MessageHub, msg: InboundMessage) -> FireOutcome {
        if self.is_busy() {
            return FireOutcome::Skipped;
        }
        let ack = RunAck::new();
        match hub.publish(msg.with_ack(ack.clone())) {
            Ok(()) => {
                self.last = Some(ack);
                FireOutcome::Published
            }
            Err(e) => {
                ack.complete();
                tracing::warn!(error = %e, "trigger publish failed");
                FireOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HubConfig;

    #[tokio::test]
    async fn test_slot_skips_until_ack_completes() {
        let hub = MessageHub::default();
        let mut rx = hub.take_inbound().unwrap();
        let mut slot = TriggerSlot::new();

        let tick = || InboundMessage::new("cron", "cron", "job", "do it");
        assert_eq!(slot.fire(&hub, tick()), FireOutcome::Published);
        assert_eq!(slot.fire(&hub, tick()), FireOutcome::Skipped);

        let first = rx.recv().await.unwrap();
        first.complete_ack();
        assert!(!slot.is_busy());
        assert_eq!(slot.fire(&hub, tick()), FireOutcome::Published);
    }

    #[test]
    fn test_dropped_publish_does_not_block_next_tick() {
        let hub = MessageHub::new(HubConfig {
            inbound_capacity: 1,
            ..HubConfig::default()
        });
        hub.publish(InboundMessage::new("x", "u", "c", "filler")).unwrap();

        let mut slot = TriggerSlot::new();
        let tick = InboundMessage::new("cron", "cron", "job", "do it");
        assert_eq!(slot.fire(&hub, tick), FireOutcome::Dropped);
        assert!(!slot.is_busy());
    }
}
