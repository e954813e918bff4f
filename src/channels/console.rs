//! 控制台通道：stdin 每行一条入站消息，回复写到 stdout

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Channel;
use crate::bus::{InboundMessage, MessageHub};

pub const CONSOLE_CHANNEL: &str = "console";
const LOCAL_ID: &str = "local";

#[derive(Debug, Default)]
pub struct ConsoleChannel;

impl ConsoleChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        CONSOLE_CHANNEL
    }

    fn start(self: Arc<Self>, hub: Arc<MessageHub>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut outbound = hub.subscribe(CONSOLE_CHANNEL);

        let out_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            loop {
                tokio::select! {
                    _ = out_cancel.cancelled() => break,
                    next = outbound.recv() => match next {
                        Some(msg) => {
                            if write_line(&mut stdout, &msg.text).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                }
            }
            // 停止前写完已经送到的回复
            while let Ok(msg) = outbound.try_recv() {
                if write_line(&mut stdout, &msg.text).await.is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let text = line.trim();
                            if text.is_empty() {
                                continue;
                            }
                            let msg = InboundMessage::new(CONSOLE_CHANNEL, LOCAL_ID, LOCAL_ID, text);
                            if let Err(e) = hub.publish(msg) {
                                tracing::warn!(error = %e, "console: failed to publish input");
                            }
                        }
                        Ok(None) => {
                            tracing::info!("console: stdin closed");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "console: read error");
                            break;
                        }
                    },
                }
            }
        });

        vec![writer, reader]
    }
}

async fn write_line(stdout: &mut tokio::io::Stdout, text: &str) -> std::io::Result<()> {
    stdout.write_all(format!("{}\n", text).as_bytes()).await?;
    stdout.flush().await
}
