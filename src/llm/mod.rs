//! LLM 层：Provider 抽象与实现（OpenAI 兼容 / Mock / 脚本化）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{MockProvider, ScriptStep, ScriptedProvider};
pub use openai::OpenAiProvider;
pub use traits::{LlmError, LlmProvider};
pub use types::{ProviderResponse, Role, ToolCall, ToolDefinition, Turn};

/// 根据配置选择 Provider：有 API Key 或自定义 api_base（如 Ollama）时走 OpenAI 兼容端点，否则 Mock
pub fn create_provider_from_config(cfg: &AppConfig) -> Arc<dyn LlmProvider> {
    let api_key = cfg.api_key();
    let api_base = cfg.llm.api_base.as_deref().filter(|b| !b.trim().is_empty());

    if api_key.is_some() || api_base.is_some() {
        let model = cfg.llm.model.as_deref();
        tracing::info!(
            provider = %cfg.llm.provider,
            base = api_base.unwrap_or(openai::DEFAULT_API_BASE),
            "Using OpenAI-compatible provider"
        );
        Arc::new(OpenAiProvider::new(
            api_key.as_deref().unwrap_or_default(),
            api_base,
            model,
            cfg.agent.provider_timeout_secs,
        ))
    } else {
        tracing::warn!("No API key or base configured, using Mock provider");
        Arc::new(MockProvider)
    }
}
