//! Telegram 通道：getUpdates 长轮询 + sendMessage
//!
//! 入站按 offset 去重，白名单之外的发送者直接丢弃；出站超过 4096 字符时拆成多条。
//! HTTP 失败只记录日志，稍后重试；不做 Markdown 方言转义，以纯文本发送。

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AllowList, Channel};
use crate::bus::{InboundMessage, MessageHub, OutboundMessage};

pub const TELEGRAM_CHANNEL: &str = "telegram";
const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_PAUSE: Duration = Duration::from_secs(1);
/// 单条消息的最大字符数
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct UpdatesResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: TgChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TgUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

/// 把一批更新转成入站消息，并推进 offset；白名单外的发送者与非文本消息被跳过
pub fn parse_updates(resp: UpdatesResponse, allow: &AllowList, offset: &mut i64) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    for update in resp.result {
        if update.update_id >= *offset {
            *offset = update.update_id + 1;
        }
        let Some(message) = update.message else {
            continue;
        };
        let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let from = message.from.map(|u| u.id.to_string()).unwrap_or_default();
        if !allow.allows(&from) {
            tracing::info!(sender = %from, "telegram: dropping message from unauthorized user");
            continue;
        }
        out.push(InboundMessage::new(
            TELEGRAM_CHANNEL,
            from,
            message.chat.id.to_string(),
            text,
        ));
    }
    out
}

/// 按字符数拆分长消息，尽量在换行处断开
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for line in text.split_inclusive('\n') {
        let len = line.chars().count();
        if count + len > max_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            count = 0;
        }
        if len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(max_chars) {
                parts.push(chunk.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        count += len;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

pub struct TelegramChannel {
    client: Client,
    base: String,
    allow: AllowList,
}

impl TelegramChannel {
    pub fn new(token: &str, allow: AllowList) -> Self {
        Self::with_base(&format!("{}/bot{}", API_BASE, token), allow)
    }

    /// 指定完整的 bot 基地址（测试服务器等）
    pub fn with_base(base: &str, allow: AllowList) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            allow,
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<UpdatesResponse, String> {
        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base))
            .json(&json!({ "offset": offset, "timeout": POLL_TIMEOUT_SECS }))
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json::<UpdatesResponse>().await.map_err(|e| e.without_url().to_string())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), String> {
        for part in split_message(&msg.text, MAX_MESSAGE_CHARS) {
            let resp = self
                .client
                .post(format!("{}/sendMessage", self.base))
                .json(&json!({ "chat_id": msg.conversation_id, "text": part }))
                .send()
                .await
                .map_err(|e| e.without_url().to_string())?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(format!("HTTP {}: {}", status, body.trim()));
            }
        }
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>, hub: Arc<MessageHub>, cancel: CancellationToken) {
        let mut offset = 0i64;
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.get_updates(offset) => res,
            };
            match polled {
                Ok(resp) => {
                    if !resp.ok {
                        tracing::warn!("telegram: getUpdates returned ok=false");
                    }
                    for msg in parse_updates(resp, &self.allow, &mut offset) {
                        if let Err(e) = hub.publish(msg) {
                            tracing::warn!(error = %e, "telegram: failed to publish update");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "telegram: getUpdates failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_PAUSE) => {}
                    }
                }
            }
        }
        tracing::info!("telegram: stopping inbound polling");
    }
}

impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        TELEGRAM_CHANNEL
    }

    fn start(self: Arc<Self>, hub: Arc<MessageHub>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut outbound = hub.subscribe(TELEGRAM_CHANNEL);

        let sender = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = outbound.recv() => match next {
                            Some(msg) => {
                                if let Err(e) = this.send(&msg).await {
                                    tracing::warn!(chat = %msg.conversation_id, error = %e, "telegram: sendMessage failed");
                                }
                            }
                            None => break,
                        },
                    }
                }
                while let Ok(msg) = outbound.try_recv() {
                    if let Err(e) = this.send(&msg).await {
                        tracing::warn!(chat = %msg.conversation_id, error = %e, "telegram: sendMessage failed");
                    }
                }
                tracing::info!("telegram: stopping outbound sender");
            })
        };

        let poller = tokio::spawn(self.poll_loop(hub, cancel));
        vec![sender, poller]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(raw: serde_json::Value) -> UpdatesResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_parse_updates_advances_offset_and_filters() {
        let resp = updates(json!({
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 1, "from": {"id": 42}, "chat": {"id": 100}, "text": "hi"}},
                {"update_id": 11, "message": {"message_id": 2, "from": {"id": 7}, "chat": {"id": 101}, "text": "intruder"}},
                {"update_id": 12, "message": {"message_id": 3, "from": {"id": 42}, "chat": {"id": 100}}},
                {"update_id": 13}
            ]
        }));
        let mut offset = 0;
        let msgs = parse_updates(resp, &AllowList::new(vec!["42"]), &mut offset);
        assert_eq!(offset, 14);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].channel, TELEGRAM_CHANNEL);
        assert_eq!(msgs[0].sender_id, "42");
        assert_eq!(msgs[0].conversation_id, "100");
        assert_eq!(msgs[0].text, "hi");
    }

    #[test]
    fn test_open_allow_list_accepts_everyone() {
        let resp = updates(json!({
            "ok": true,
            "result": [{"update_id": 1, "message": {"from": {"id": 5}, "chat": {"id": -9}, "text": "group"}}]
        }));
        let mut offset = 0;
        let msgs = parse_updates(resp, &AllowList::default(), &mut offset);
        assert_eq!(msgs[0].conversation_id, "-9");
    }

    #[test]
    fn test_split_message() {
        assert_eq!(split_message("short", 10), vec!["short"]);
        let parts = split_message("aaaa\nbbbb\ncc", 6);
        assert_eq!(parts, vec!["aaaa\n", "bbbb\n", "cc"]);
        let long = "x".repeat(25);
        let parts = split_message(&long, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
    }
}
