//! message：立即向某个通道/会话发送一条消息（默认当前会话）

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::bus::{MessageHub, OutboundMessage};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
struct MessageArgs {
    content: String,
    /// 目标通道，默认当前通道
    #[serde(default)]
    channel: Option<String>,
    /// 目标会话，默认当前会话
    #[serde(default)]
    conversation_id: Option<String>,
}

pub struct MessageTool {
    hub: Arc<MessageHub>,
}

impl MessageTool {
    pub fn new(hub: Arc<MessageHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user right away (defaults to the current conversation)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<MessageArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let args: MessageArgs = parse_args(args)?;
        let channel = args
            .channel
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ctx.channel.clone());
        let conversation_id = args
            .conversation_id
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| ctx.conversation_id.clone());
        if channel.is_empty() {
            return Err("no target channel".to_string());
        }
        self.hub
            .send_outbound(OutboundMessage::new(&channel, &conversation_id, args.content))
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Message sent to {}:{}", channel, conversation_id))
    }
}
