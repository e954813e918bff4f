//! LLM Provider 抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 脚本化测试桩）实现 LlmProvider：chat（带工具目录的一次补全）
//! 与 default_model。重试属于具体 Provider 自己的事，编排层不重试。

use async_trait::async_trait;
use thiserror::Error;

use super::types::{ProviderResponse, ToolDefinition, Turn};

/// Provider 层错误（网络、鉴权、响应格式）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: status {status}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// LLM Provider trait：一次对话补全 + 默认模型名
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// 发送完整对话与工具目录，返回文本或工具调用
    async fn chat(
        &self,
        turns: &[Turn],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<ProviderResponse, LlmError>;

    /// 未显式指定模型时使用的模型名
    fn default_model(&self) -> &str;
}
