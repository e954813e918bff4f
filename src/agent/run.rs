//! 单次 AgentRun 的状态机
//!
//! Start → ContextBuilt → AwaitingProvider → Completed
//!                              ↓ 有工具调用          ↑
//!                        ExecutingTools ────────────┘
//! 任意状态可转入 Failed（Provider 错误、超时、迭代上限）或 Aborted（取消）。
//! 迭代计数即 Provider 调用次数，每次调用前检查上限。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::InboundMessage;
use crate::context::{ContextBuilder, ContextInputs};
use crate::core::AgentError;
use crate::llm::{LlmProvider, ProviderResponse, Turn};
use crate::memory::MemoryStore;
use crate::session::RunGuard;
use crate::skills::{render_catalog, SkillLoader};
use crate::tools::{ToolContext, ToolExecutor};

/// Provider 返回空内容时的占位回复
pub const EMPTY_REPLY: &str = "(no response)";

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    ContextBuilt,
    AwaitingProvider,
    ExecutingTools,
    Completed,
    Failed,
    Aborted,
}

/// 终止结果
#[derive(Debug)]
pub enum RunOutcome {
    Completed { reply: String, iterations: usize },
    Failed { error: AgentError, iterations: usize },
    Aborted { iterations: usize },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed { .. } => RunState::Completed,
            RunOutcome::Failed { .. } => RunState::Failed,
            RunOutcome::Aborted { .. } => RunState::Aborted,
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            RunOutcome::Completed { iterations, .. }
            | RunOutcome::Failed { iterations, .. }
            | RunOutcome::Aborted { iterations } => *iterations,
        }
    }
}

/// 运行参数
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// 为 None 时使用 Provider 的默认模型
    pub model: Option<String>,
    pub max_iterations: usize,
    pub provider_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_iterations: 10,
            provider_timeout: Duration::from_secs(60),
        }
    }
}

/// 执行 AgentRun：组装上下文、调用 Provider、执行工具、写回历史
pub struct AgentRunner {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<ToolExecutor>,
    context: ContextBuilder,
    memory: Option<MemoryStore>,
    skills: Option<SkillLoader>,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: Arc<ToolExecutor>, context: ContextBuilder) -> Self {
        Self {
            provider,
            executor,
            context,
            memory: None,
            skills: None,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_skills(mut self, skills: SkillLoader) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn model(&self) -> &str {
        self.config
            .model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Start → ContextBuilt：可选输入加载失败只记录，不影响运行
    fn build_context(&self, history: &[Turn], msg: &InboundMessage) -> Vec<Turn> {
        let (memory_context, memories) = match &self.memory {
            Some(store) => (store.read_context(), store.items()),
            None => (String::new(), Vec::new()),
        };
        let catalog = match &self.skills {
            Some(loader) => match loader.load_all() {
                Ok(skills) => render_catalog(&skills),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load skills, continuing without catalog");
                    None
                }
            },
            None => None,
        };
        self.context.build(ContextInputs {
            history,
            current_text: &msg.text,
            channel: &msg.channel,
            conversation_id: &msg.conversation_id,
            memory_context: &memory_context,
            memories: &memories,
            skills_catalog: catalog.as_deref(),
        })
    }

    /// AwaitingProvider：带截止时间与取消
    async fn call_provider(
        &self,
        turns: &[Turn],
        cancel: &CancellationToken,
    ) -> Result<Option<ProviderResponse>, AgentError> {
        let tools = self.executor.definitions();
        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            res = tokio::time::timeout(self.config.provider_timeout, self.provider.chat(turns, &tools, self.model())) => {
                match res {
                    Ok(Ok(resp)) => Ok(Some(resp)),
                    Ok(Err(e)) => Err(AgentError::Provider(e)),
                    Err(_) => Err(AgentError::ProviderTimeout(self.config.provider_timeout.as_secs())),
                }
            }
        }
    }

    /// 处理一条入站消息；调用方持有该会话的运行锁
    pub async fn run(&self, guard: &mut RunGuard, msg: &InboundMessage, cancel: &CancellationToken) -> RunOutcome {
        let key = guard.key().clone();
        let mut state = RunState::Start;
        tracing::debug!(session = %key, ?state, "run started");

        if cancel.is_cancelled() {
            return RunOutcome::Aborted { iterations: 0 };
        }

        let mut turns = self.build_context(guard.history().turns(), msg);
        guard.history_mut().push(Turn::user(&msg.text));
        state = RunState::ContextBuilt;
        tracing::debug!(session = %key, ?state, turns = turns.len(), "context built");

        let ctx = ToolContext::new(&msg.channel, &msg.conversation_id, &msg.sender_id);
        let mut iterations = 0usize;

        loop {
            if iterations >= self.config.max_iterations {
                tracing::warn!(session = %key, iterations, "iteration ceiling reached");
                return RunOutcome::Failed {
                    error: AgentError::IterationLimit(self.config.max_iterations),
                    iterations,
                };
            }
            iterations += 1;
            state = RunState::AwaitingProvider;
            tracing::debug!(session = %key, ?state, iteration = iterations, "calling provider");

            let response = match self.call_provider(&turns, cancel).await {
                Ok(Some(resp)) => resp,
                Ok(None) => {
                    tracing::info!(session = %key, iterations, "run aborted while awaiting provider");
                    return RunOutcome::Aborted { iterations };
                }
                Err(error) => {
                    tracing::warn!(session = %key, error = %error, "provider call failed");
                    return RunOutcome::Failed { error, iterations };
                }
            };

            if !response.has_tool_calls() {
                let reply = if response.content.trim().is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    response.content
                };
                guard.history_mut().push(Turn::assistant(&reply));
                tracing::info!(session = %key, iterations, "run completed");
                return RunOutcome::Completed { reply, iterations };
            }

            state = RunState::ExecutingTools;
            tracing::debug!(session = %key, ?state, calls = response.tool_calls.len(), "executing tools");

            let results = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(session = %key, iterations, "run aborted while executing tools");
                    return RunOutcome::Aborted { iterations };
                }
                results = self.executor.execute_all(&response.tool_calls, &ctx) => results,
            };

            // 调用与全部结果一起写入，历史中不会出现没有结果的调用
            let mut exchange = Vec::with_capacity(results.len() + 1);
            exchange.push(Turn::assistant_with_calls(response.content, response.tool_calls));
            exchange.extend(results.iter().map(|r| r.to_turn()));
            turns.extend(exchange.iter().cloned());
            guard.history_mut().extend(exchange);
        }
    }
}
