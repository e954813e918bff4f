//! Agent 错误类型与面向用户的提示
//!
//! 运行期错误（Provider 失败、迭代超限、取消）都会终止当前 AgentRun，并通过 `user_notice`
//! 转成一条简短、不泄露内部细节的回复；工具错误只在 ToolResult 里出现，不会走到这里。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行与启动过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("Provider timeout after {0}s")]
    ProviderTimeout(u64),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 达到迭代上限仍未得到最终回复
    #[error("Too many tool iterations ({0})")]
    IterationLimit(usize),

    /// 启动期配置错误：同名工具重复注册
    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 终止运行的错误对应的用户可见提示（不含堆栈、密钥等内部信息）
    pub fn user_notice(&self) -> &'static str {
        match self {
            AgentError::Provider(_) | AgentError::ProviderTimeout(_) => {
                "Sorry, I couldn't reach the language model right now. Please try again in a moment."
            }
            AgentError::IterationLimit(_) => {
                "Sorry, I couldn't finish this request: it needed too many tool steps."
            }
            AgentError::Cancelled => "Your request was cancelled before it could finish.",
            _ => "Sorry, something went wrong while handling your message.",
        }
    }

    /// 是否属于启动期致命错误（进程不应继续启动）
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, AgentError::DuplicateTool(_) | AgentError::ConfigError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_does_not_leak_details() {
        let err = AgentError::Provider(LlmError::Api {
            status: 401,
            body: "invalid api key sk-secret".to_string(),
        });
        assert!(!err.user_notice().contains("sk-secret"));
        assert!(!err.user_notice().contains("401"));
    }

    #[test]
    fn test_iteration_limit_notice() {
        let err = AgentError::IterationLimit(5);
        assert!(err.user_notice().contains("too many tool steps"));
        assert_eq!(err.to_string(), "Too many tool iterations (5)");
    }

    #[test]
    fn test_fatal_config_classification() {
        assert!(AgentError::DuplicateTool("echo".into()).is_fatal_config());
        assert!(!AgentError::Cancelled.is_fatal_config());
    }
}
