//! 网关构建器：从配置组装 Hub、会话表、工具、Provider、编排循环、触发器与通道
//!
//! 所有接入方式（控制台、Telegram、定时任务）共享同一套工具与同一个 AgentLoop。
//! 启动期错误（重复工具名、非法 cron 任务文件、缺少 Telegram token）在 build 时返回，进程不会启动。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::AgentError;
use super::shutdown::ShutdownManager;
use crate::agent::{AgentLoop, AgentRunner, RunnerConfig};
use crate::bus::{HubConfig, MessageHub};
use crate::channels::{AllowList, Channel, ConsoleChannel, TelegramChannel};
use crate::config::AppConfig;
use crate::context::ContextBuilder;
use crate::llm::{create_provider_from_config, LlmProvider};
use crate::memory::{KeywordRanker, MemoryStore};
use crate::scheduler::{CronService, HeartbeatService};
use crate::session::SessionRegistry;
use crate::skills::SkillLoader;
use crate::tools::{
    CronTool, EchoTool, ListDirTool, MessageTool, ReadFileTool, SafeFs, ShellTool, Tool,
    ToolExecutor, ToolRegistry, WebFetchTool, WriteFileTool, WriteMemoryTool,
};

/// 网关构建器
pub struct GatewayBuilder {
    config: AppConfig,
    workspace: PathBuf,
    provider: Option<Arc<dyn LlmProvider>>,
    extra_tools: Vec<Arc<dyn Tool>>,
}

impl GatewayBuilder {
    pub fn new(config: AppConfig) -> Self {
        let workspace = config.workspace();
        Self {
            config,
            workspace,
            provider: None,
            extra_tools: Vec::new(),
        }
    }

    /// 覆盖配置中的工作目录
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// 使用指定 Provider，不再按配置创建
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 额外注册一个工具（与内置工具同名时 build 失败）
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 构建统一的工具注册表
    fn build_tool_registry(
        &self,
        workspace: &Path,
        hub: &Arc<MessageHub>,
        cron: Option<&Arc<CronService>>,
    ) -> Result<ToolRegistry, AgentError> {
        let tools_cfg = &self.config.tools;
        let fs = SafeFs::new(workspace);
        let mut tools = ToolRegistry::new();

        tools.register(EchoTool)?;
        tools.register(ReadFileTool::new(fs.clone()))?;
        tools.register(WriteFileTool::new(fs.clone()))?;
        tools.register(ListDirTool::new(fs))?;
        tools.register(ShellTool::new(
            tools_cfg.shell.allowed_commands.clone(),
            workspace,
            tools_cfg.tool_timeout_secs,
        ))?;
        tools.register(WebFetchTool::new(
            tools_cfg.web.allowed_domains.clone(),
            tools_cfg.web.timeout_secs,
            tools_cfg.web.max_result_chars,
        ))?;
        tools.register(WriteMemoryTool::new(MemoryStore::new(workspace)))?;
        tools.register(MessageTool::new(Arc::clone(hub)))?;
        if let Some(cron) = cron {
            tools.register(CronTool::new(Arc::clone(cron)))?;
        }

        for tool in &self.extra_tools {
            tools.register_arc(Arc::clone(tool))?;
        }
        Ok(tools)
    }

    fn build_channels(&self) -> Result<Vec<Arc<dyn Channel>>, AgentError> {
        let cfg = &self.config.channels;
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
        if cfg.console.enabled {
            channels.push(Arc::new(ConsoleChannel::new()));
        }
        if cfg.telegram.enabled {
            let token = cfg
                .telegram
                .token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AgentError::ConfigError("telegram enabled but no token configured".to_string()))?;
            let allow = AllowList::new(cfg.telegram.allow_from.iter().cloned());
            if allow.is_open() {
                tracing::warn!("telegram allow_from is empty, every user can talk to the agent");
            }
            channels.push(Arc::new(TelegramChannel::new(token, allow)));
        }
        Ok(channels)
    }

    /// 组装全部组件；任何配置错误都会中止启动
    pub fn build(self) -> Result<Gateway, AgentError> {
        let cfg = &self.config;
        std::fs::create_dir_all(&self.workspace).map_err(|e| {
            AgentError::ConfigError(format!("cannot create workspace {}: {}", self.workspace.display(), e))
        })?;
        let workspace = self
            .workspace
            .canonicalize()
            .unwrap_or_else(|_| self.workspace.clone());

        let hub = Arc::new(MessageHub::new(HubConfig::from(&cfg.bus)));
        let sessions = Arc::new(SessionRegistry::new(
            cfg.agent.max_history_turns,
            cfg.agent.max_pending_per_session,
        ));

        let cron = if cfg.cron.enabled {
            let store = CronService::store_path_for(&workspace);
            Some(Arc::new(CronService::load(&store, Arc::clone(&hub))?))
        } else {
            None
        };

        let tools = self.build_tool_registry(&workspace, &hub, cron.as_ref())?;
        tracing::info!(tools = ?tools.tool_names(), "tool registry ready");
        let executor = Arc::new(ToolExecutor::new(tools, cfg.tools.tool_timeout_secs));

        let provider = self
            .provider
            .clone()
            .unwrap_or_else(|| create_provider_from_config(cfg));

        let mut context = ContextBuilder::new(&workspace)
            .with_ranker(Arc::new(KeywordRanker), cfg.agent.memory_top_k);
        if let Some(prompt) = cfg.agent.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            context = context.with_system_prompt(prompt);
        }

        let runner = AgentRunner::new(provider, Arc::clone(&executor), context)
            .with_memory(MemoryStore::new(&workspace))
            .with_skills(SkillLoader::for_workspace(&workspace))
            .with_config(RunnerConfig {
                model: cfg.agent.model.clone(),
                max_iterations: cfg.agent.max_iterations,
                provider_timeout: Duration::from_secs(cfg.agent.provider_timeout_secs.max(1)),
            });

        let heartbeat = if cfg.heartbeat.enabled {
            Some(Arc::new(
                HeartbeatService::new(
                    &workspace,
                    Arc::clone(&hub),
                    Duration::from_secs(cfg.heartbeat.interval_secs.max(1)),
                )
                .with_target(cfg.heartbeat.channel.clone(), cfg.heartbeat.conversation_id.clone()),
            ))
        } else {
            None
        };

        let channels = self.build_channels()?;
        if channels.is_empty() {
            tracing::warn!("no channels enabled; only scheduled triggers will produce messages");
        }

        Ok(Gateway {
            hub,
            sessions,
            runner: Arc::new(runner),
            executor,
            cron,
            cron_tick: Duration::from_secs(cfg.cron.tick_secs.max(1)),
            heartbeat,
            channels,
            queue_notice: cfg.agent.queue_notice,
            workspace,
        })
    }
}

/// 组装完成、尚未启动的网关
pub struct Gateway {
    hub: Arc<MessageHub>,
    sessions: Arc<SessionRegistry>,
    runner: Arc<AgentRunner>,
    executor: Arc<ToolExecutor>,
    cron: Option<Arc<CronService>>,
    cron_tick: Duration,
    heartbeat: Option<Arc<HeartbeatService>>,
    channels: Vec<Arc<dyn Channel>>,
    queue_notice: bool,
    workspace: PathBuf,
}

impl Gateway {
    pub fn hub(&self) -> &Arc<MessageHub> {
        &self.hub
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tool_names()
    }

    pub fn cron(&self) -> Option<&Arc<CronService>> {
        self.cron.as_ref()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 启动路由、编排循环、触发器与通道；运行任务挂在 ShutdownManager 的追踪器上
    ///
    /// 通道在生产者之前完成订阅，触发器最后启动。路由与通道不监听根 token，
    /// 由 [`Running::stop`] 在运行收尾之后再关闭，取消通知才能送达。
    pub fn start(self, shutdown: &ShutdownManager) -> Running {
        let cancel = shutdown.token();
        let router_cancel = CancellationToken::new();
        let channel_cancel = CancellationToken::new();

        let router = self.hub.spawn_router(router_cancel.clone());

        let mut channels = Vec::new();
        for channel in &self.channels {
            tracing::info!(channel = channel.name(), "starting channel");
            channels.extend(Arc::clone(channel).start(Arc::clone(&self.hub), channel_cancel.clone()));
        }

        let mut workers = Vec::new();
        let agent_loop = Arc::new(
            AgentLoop::new(Arc::clone(&self.hub), Arc::clone(&self.sessions), self.runner)
                .with_queue_notice(self.queue_notice)
                .with_tracker(shutdown.tracker()),
        );
        let loop_cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = agent_loop.run(loop_cancel).await {
                tracing::error!(error = %e, "agent loop exited with error");
            }
        }));

        if let Some(cron) = self.cron {
            tracing::info!(jobs = cron.list_jobs(None).len(), "starting cron service");
            workers.push(tokio::spawn(cron.run(self.cron_tick, cancel.clone())));
        }
        if let Some(heartbeat) = self.heartbeat {
            tracing::info!("starting heartbeat");
            workers.push(tokio::spawn(heartbeat.run(cancel)));
        }

        Running {
            router_cancel,
            channel_cancel,
            router,
            channels,
            workers,
        }
    }
}

/// 已启动的网关任务
pub struct Running {
    router_cancel: CancellationToken,
    channel_cancel: CancellationToken,
    router: Option<JoinHandle<()>>,
    channels: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Running {
    pub fn task_count(&self) -> usize {
        usize::from(self.router.is_some()) + self.channels.len() + self.workers.len()
    }

    /// 按顺序收尾：等进行中的运行结束，再停路由（清空出站队列），最后停通道（写完已收到的回复）
    ///
    /// 调用前应已触发 `shutdown`；运行未能在 grace 内结束时返回 false。
    pub async fn stop(self, shutdown: &ShutdownManager, grace: Duration) -> bool {
        let drained = shutdown.drain(grace).await;
        for worker in self.workers {
            join_or_abort(worker, grace).await;
        }

        self.router_cancel.cancel();
        if let Some(router) = self.router {
            join_or_abort(router, grace).await;
        }

        self.channel_cancel.cancel();
        for channel in self.channels {
            join_or_abort(channel, grace).await;
        }
        drained
    }
}

async fn join_or_abort(mut handle: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, &mut handle).await.is_err() {
        tracing::warn!("task did not stop in time, aborting");
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InboundMessage;
    use crate::llm::{MockProvider, ProviderResponse, ScriptStep, ScriptedProvider};
    use crate::session::SessionKey;

    fn config_in(dir: &Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(dir.to_path_buf());
        cfg
    }

    #[test]
    fn test_build_registers_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = GatewayBuilder::new(config_in(dir.path()))
            .with_provider(Arc::new(MockProvider))
            .build()
            .unwrap();
        let names = gateway.tool_names();
        for expected in ["echo", "read_file", "write_file", "list_dir", "exec", "web_fetch", "write_memory", "message", "cron"] {
            assert!(names.iter().any(|n| n == expected), "missing tool {}", expected);
        }
        assert!(gateway.channel_names().is_empty());
    }

    #[test]
    fn test_cron_disabled_omits_cron_tool() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.cron.enabled = false;
        let gateway = GatewayBuilder::new(cfg)
            .with_provider(Arc::new(MockProvider))
            .build()
            .unwrap();
        assert!(gateway.cron().is_none());
        assert!(!gateway.tool_names().iter().any(|n| n == "cron"));
    }

    #[test]
    fn test_duplicate_tool_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = GatewayBuilder::new(config_in(dir.path()))
            .with_provider(Arc::new(MockProvider))
            .with_tool(Arc::new(EchoTool))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "echo"));
    }

    #[test]
    fn test_telegram_without_token_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.channels.telegram.enabled = true;
        let err = GatewayBuilder::new(cfg)
            .with_provider(Arc::new(MockProvider))
            .build()
            .err()
            .unwrap();
        assert!(err.is_fatal_config());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = GatewayBuilder::new(config_in(dir.path()))
            .with_provider(Arc::new(MockProvider))
            .build()
            .unwrap();
        let shutdown = ShutdownManager::new();
        let running = gateway.start(&shutdown);
        assert!(running.task_count() > 0);

        shutdown.shutdown(crate::core::ShutdownReason::UserInitiated);
        let stopped = tokio::time::timeout(Duration::from_secs(3), running.stop(&shutdown, Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_shutdown_still_delivers_cancellation_notice() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new([ScriptStep::Delay(
            Duration::from_secs(30),
            ProviderResponse::text("too late"),
        )]);
        let gateway = GatewayBuilder::new(config_in(dir.path()))
            .with_provider(Arc::new(provider))
            .build()
            .unwrap();
        let hub = Arc::clone(gateway.hub());
        let sessions = Arc::clone(gateway.sessions());
        let mut out = hub.subscribe("x");

        let shutdown = ShutdownManager::new();
        let running = gateway.start(&shutdown);
        hub.publish(InboundMessage::new("x", "u1", "c1", "hello")).unwrap();

        let key = SessionKey::new("x", "c1");
        tokio::time::timeout(Duration::from_secs(2), async {
            while !sessions.is_running(&key) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.shutdown(crate::core::ShutdownReason::Signal);
        assert!(running.stop(&shutdown, Duration::from_secs(2)).await);

        let notice = out.try_recv().unwrap();
        assert_eq!(notice.conversation_id, "c1");
        assert_eq!(notice.text, AgentError::Cancelled.user_notice());
        assert!(out.try_recv().is_err());
        assert!(!sessions.is_running(&key));
    }
}
