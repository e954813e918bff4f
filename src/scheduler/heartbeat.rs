//! 心跳：周期性检查 workspace/HEARTBEAT.md，有待办内容时发布一条提示

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{FireOutcome, TriggerSlot};
use crate::bus::{InboundMessage, MessageHub, HEARTBEAT_CHANNEL};

pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

pub const HEARTBEAT_PROMPT: &str = "Read HEARTBEAT.md in your workspace and follow any tasks listed there. \
If nothing needs attention, reply with HEARTBEAT_OK.";

/// 是否有需要处理的内容：忽略空行、标题、HTML 注释和空的未勾选框
pub fn is_actionable(content: &str) -> bool {
    let mut in_comment = false;
    for line in content.lines() {
        let line = line.trim();
        if in_comment {
            if line.contains("-->") {
                in_comment = false;
            }
            continue;
        }
        if line.starts_with("<!--") {
            in_comment = !line.contains("-->");
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let rest = line
            .strip_prefix("- [ ]")
            .or_else(|| line.strip_prefix("* [ ]"))
            .map(str::trim);
        if rest == Some("") {
            continue;
        }
        return true;
    }
    false
}

/// 心跳服务
pub struct HeartbeatService {
    file: PathBuf,
    hub: Arc<MessageHub>,
    interval: Duration,
    channel: String,
    conversation_id: String,
    slot: Mutex<TriggerSlot>,
}

impl HeartbeatService {
    pub fn new(workspace: impl AsRef<Path>, hub: Arc<MessageHub>, interval: Duration) -> Self {
        Self {
            file: workspace.as_ref().join(HEARTBEAT_FILE),
            hub,
            interval,
            channel: HEARTBEAT_CHANNEL.to_string(),
            conversation_id: HEARTBEAT_CHANNEL.to_string(),
            slot: Mutex::new(TriggerSlot::new()),
        }
    }

    /// 把回复投递到指定通道/会话（默认是保留标签 heartbeat）
    pub fn with_target(mut self, channel: Option<String>, conversation_id: Option<String>) -> Self {
        if let Some(ch) = channel.filter(|c| !c.is_empty()) {
            self.channel = ch;
        }
        if let Some(conv) = conversation_id.filter(|c| !c.is_empty()) {
            self.conversation_id = conv;
        }
        self
    }

    /// 检查一次；没有待办内容时返回 None
    pub fn tick(&self) -> Option<FireOutcome> {
        let content = std::fs::read_to_string(&self.file).ok()?;
        if !is_actionable(&content) {
            tracing::debug!("heartbeat: nothing actionable");
            return None;
        }
        let msg = InboundMessage::new(&self.channel, HEARTBEAT_CHANNEL, &self.conversation_id, HEARTBEAT_PROMPT);
        let outcome = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fire(&self.hub, msg);
        match outcome {
            FireOutcome::Published => tracing::info!("heartbeat published"),
            FireOutcome::Skipped => tracing::info!("heartbeat: previous run still in progress, skipping"),
            FireOutcome::Dropped => {}
        }
        Some(outcome)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval 的第一次 tick 立即完成，启动时不触发
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
        tracing::debug!("heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_content() {
        assert!(!is_actionable(""));
        assert!(!is_actionable("# Heartbeat\n\n<!-- add tasks below\n- like this -->\n- [ ]\n"));
        assert!(is_actionable("# Tasks\n- [ ] water the plants"));
        assert!(is_actionable("check the server logs"));
    }

    #[tokio::test]
    async fn test_tick_publishes_only_when_actionable() {
        let ws = tempfile::tempdir().unwrap();
        let hub = Arc::new(MessageHub::default());
        let mut rx = hub.take_inbound().unwrap();
        let svc = HeartbeatService::new(ws.path(), Arc::clone(&hub), Duration::from_secs(60))
            .with_target(Some("telegram".into()), Some("99".into()));

        assert_eq!(svc.tick(), None);
        std::fs::write(ws.path().join(HEARTBEAT_FILE), "# Heartbeat\n").unwrap();
        assert_eq!(svc.tick(), None);

        std::fs::write(ws.path().join(HEARTBEAT_FILE), "- [ ] send weekly report\n").unwrap();
        assert_eq!(svc.tick(), Some(FireOutcome::Published));
        assert_eq!(svc.tick(), Some(FireOutcome::Skipped));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.conversation_id, "99");
        assert_eq!(msg.text, HEARTBEAT_PROMPT);
    }
}
