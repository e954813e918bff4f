//! 工具执行器
//!
//! 持有只读的 ToolRegistry 与单次调用超时。execute 从不返回错误：未知工具、工具失败、超时都编码进 ToolResult，
//! 作为 tool 轮次回传给模型。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use std::panic::AssertUnwindSafe;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::llm::{ToolCall, ToolDefinition, Turn};
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// 一次工具调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    fn ok(call: &ToolCall, content: String) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            content,
            is_error: false,
        }
    }

    fn error(call: &ToolCall, err: &AgentError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            content: format!("Error: {}", err),
            is_error: true,
        }
    }

    /// 转为回传给模型的 tool 轮次
    pub fn to_turn(&self) -> Turn {
        Turn::tool_result(&self.call_id, &self.content)
    }
}

/// 工具执行器：对每次调用施加超时，失败不外泄
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs.max(1)))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout,
        }
    }

    /// 执行单个调用；不重试
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let preview = args_preview(&call.arguments);

        let (outcome, result) = match self.registry.get(&call.name) {
            None => {
                let err = AgentError::UnknownTool(call.name.clone());
                ("unknown", ToolResult::error(call, &err))
            }
            Some(tool) => {
                let invoke = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind();
                match timeout(self.timeout, invoke).await {
                    Ok(Ok(Ok(content))) => ("ok", ToolResult::ok(call, content)),
                    Ok(Ok(Err(e))) => ("error", ToolResult::error(call, &AgentError::ToolExecutionFailed(e))),
                    Ok(Err(_)) => {
                        tracing::error!(tool = %call.name, "tool panicked");
                        let err = AgentError::ToolExecutionFailed("tool panicked".to_string());
                        ("panic", ToolResult::error(call, &err))
                    }
                    Err(_) => ("timeout", ToolResult::error(call, &AgentError::ToolTimeout(call.name.clone()))),
                }
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "channel": ctx.channel,
            "ok": !result.is_error,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 并发执行同一响应中的所有调用，结果按调用顺序返回
    pub async fn execute_all(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute(call, ctx))).await
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool(Duration);

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, String> {
            tokio::time::sleep(self.0).await;
            Ok("woke".into())
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, String> {
            Err("disk on fire".into())
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String, String> {
            panic!("overflowed");
        }
    }

    fn executor(timeout: Duration) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::EchoTool).unwrap();
        registry.register(SlowTool(Duration::from_millis(200))).unwrap();
        registry.register(FailTool).unwrap();
        registry.register(PanicTool).unwrap();
        ToolExecutor::with_timeout(registry, timeout)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let exec = executor(Duration::from_secs(1));
        let res = exec
            .execute(&ToolCall::new("c1", "nope", json!({})), &ToolContext::default())
            .await;
        assert!(res.is_error);
        assert_eq!(res.call_id, "c1");
        assert!(res.content.contains("Unknown tool: nope"));
    }

    #[tokio::test]
    async fn test_timeout_and_failure_are_contained() {
        let exec = executor(Duration::from_millis(20));
        let ctx = ToolContext::default();
        let slow = exec.execute(&ToolCall::new("a", "slow", json!({})), &ctx).await;
        assert!(slow.is_error);
        assert!(slow.content.contains("timeout"));

        let fail = exec.execute(&ToolCall::new("b", "fail", json!({})), &ctx).await;
        assert!(fail.is_error);
        assert!(fail.content.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_error_result() {
        let exec = executor(Duration::from_secs(1));
        let calls = vec![
            ToolCall::new("p", "panic", json!({})),
            ToolCall::new("e", "echo", json!({"text": "still here"})),
        ];
        let results = exec.execute_all(&calls, &ToolContext::default()).await;
        assert!(results[0].is_error);
        assert!(results[0].content.contains("panicked"));
        assert_eq!(results[1].content, "still here");
    }

    #[tokio::test]
    async fn test_execute_all_preserves_call_order() {
        let exec = executor(Duration::from_secs(1));
        let calls = vec![
            ToolCall::new("1", "slow", json!({})),
            ToolCall::new("2", "echo", json!({"text": "fast"})),
            ToolCall::new("3", "fail", json!({})),
        ];
        let results = exec.execute_all(&calls, &ToolContext::default()).await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(results[0].content, "woke");
        assert_eq!(results[1].content, "fast");
        assert!(results[2].is_error);
    }
}
