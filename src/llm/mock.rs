//! Mock Provider（无需 API）
//!
//! - MockProvider：回显最后一条 user 消息，不请求工具，未配置密钥时作为兜底。
//! - ScriptedProvider：按顺序回放预设的响应/错误，并记录每次收到的对话，供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{LlmError, LlmProvider};
use super::types::{ProviderResponse, Role, ToolDefinition, Turn};

/// Mock Provider：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockProvider;

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(
        &self,
        turns: &[Turn],
        _tools: &[ToolDefinition],
        _model: &str,
    ) -> Result<ProviderResponse, LlmError> {
        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("(no input)");
        Ok(ProviderResponse::text(format!("Echo from Mock: {}", last_user)))
    }

    fn default_model(&self) -> &str {
        "mock"
    }
}

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(ProviderResponse),
    Fail(LlmError),
    /// 等待一段时间后再返回响应（用于超时与取消测试）
    Delay(Duration, ProviderResponse),
}

/// 脚本化 Provider：脚本耗尽后重复 fallback（默认返回错误）
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: Option<ScriptStep>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 脚本耗尽后一直返回同一步（例如永远请求工具调用）
    pub fn repeating(step: ScriptStep) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(step),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, step: ScriptStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// 到目前为止被调用的次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 每次调用收到的完整对话
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        turns: &[Turn],
        _tools: &[ToolDefinition],
        _model: &str,
    ) -> Result<ProviderResponse, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(turns.to_vec());
        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .or_else(|| self.fallback.clone());
        match step {
            Some(ScriptStep::Respond(resp)) => Ok(resp),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Delay(wait, resp)) => {
                tokio::time::sleep(wait).await;
                Ok(resp)
            }
            None => Err(LlmError::Malformed("script exhausted".to_string())),
        }
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}
