//! 通道适配器：把外部平台接到 Hub
//!
//! 每个通道先订阅自己的出站标签，再启动入站生产者，保证启动后产生的回复不会因为没有订阅者而丢失。
//! 平台级的发送者过滤（AllowList）在发布到 Hub 之前完成。

pub mod console;
pub mod telegram;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageHub;

pub use console::ConsoleChannel;
pub use telegram::TelegramChannel;

/// 通道适配器
pub trait Channel: Send + Sync {
    /// 出站标签，同时是入站消息的 channel 字段
    fn name(&self) -> &str;

    /// 订阅出站标签并启动收发任务，返回任务句柄
    fn start(self: Arc<Self>, hub: Arc<MessageHub>, cancel: CancellationToken) -> Vec<JoinHandle<()>>;
}

/// 发送者白名单：为空表示所有人可用
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: HashSet<String>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids
                .into_iter()
                .map(Into::into)
                .map(|s: String| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn allows(&self, sender_id: &str) -> bool {
        self.is_open() || self.ids.contains(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let open = AllowList::default();
        assert!(open.is_open());
        assert!(open.allows("anyone"));

        let closed = AllowList::new(vec!["42", " 7 ", ""]);
        assert!(closed.allows("42"));
        assert!(closed.allows("7"));
        assert!(!closed.allows("8"));
        assert!(!closed.allows(""));
    }
}
