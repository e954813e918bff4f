//! Echo 工具（测试用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本（也接受 `v`）
    #[serde(default, alias = "v")]
    text: String,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back (for testing)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<EchoArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: EchoArgs = parse_args(args)?;
        if args.text.is_empty() {
            Ok("(empty)".to_string())
        } else {
            Ok(args.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_accepts_short_key() {
        let ctx = ToolContext::default();
        assert_eq!(EchoTool.execute(json!({"text": "hi"}), &ctx).await.unwrap(), "hi");
        assert_eq!(EchoTool.execute(json!({"v": "42"}), &ctx).await.unwrap(), "42");
        assert_eq!(EchoTool.execute(json!({}), &ctx).await.unwrap(), "(empty)");
    }
}
