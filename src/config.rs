//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__MODEL=gpt-4o`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub bus: BusSection,
    pub tools: ToolsSection,
    pub channels: ChannelsSection,
    pub cron: CronSection,
    pub heartbeat: HeartbeatSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作目录（记忆、技能、引导文件所在），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [agent] 段：编排循环参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 覆盖 Provider 默认模型
    pub model: Option<String>,
    /// 单次运行最多调用 Provider 的次数
    pub max_iterations: usize,
    /// 会话历史保留轮数
    pub max_history_turns: usize,
    pub provider_timeout_secs: u64,
    /// 同一会话运行中时最多排队的消息数，超出则回复 busy
    pub max_pending_per_session: usize,
    /// 排队时是否回复提示
    pub queue_notice: bool,
    /// 注入上下文的相关记忆条数
    pub memory_top_k: usize,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: None,
            max_iterations: 10,
            max_history_turns: 50,
            provider_timeout_secs: 60,
            max_pending_per_session: 8,
            queue_notice: true,
            memory_top_k: 5,
            system_prompt: None,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            api_base: None,
            model: None,
        }
    }
}

/// [bus] 段：消息总线容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            inbound_capacity: 100,
            outbound_capacity: 100,
            subscriber_capacity: 100,
        }
    }
}

/// [tools] 段：工具超时、Shell 白名单、Web 抓取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            shell: ShellSection::default(),
            web: WebSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "find".into(),
                "date".into(),
                "echo".into(),
            ],
        }
    }
}

/// [tools.web] 段：抓取超时、最大字符数、域名白名单（为空表示不限制）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: Vec::new(),
        }
    }
}

/// [channels] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChannelsSection {
    pub console: ConsoleSection,
    pub telegram: TelegramSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConsoleSection {
    pub enabled: bool,
}

/// [channels.telegram] 段：allow_from 为空表示所有人可用
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramSection {
    pub enabled: bool,
    pub token: Option<String>,
    pub allow_from: Vec<String>,
}

/// [cron] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CronSection {
    pub enabled: bool,
    pub tick_secs: u64,
}

impl Default for CronSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: 1,
        }
    }
}

/// [heartbeat] 段：周期性检查 HEARTBEAT.md
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub enabled: bool,
    pub interval_secs: u64,
    /// 回复投递的通道，默认保留通道 heartbeat
    pub channel: Option<String>,
    pub conversation_id: Option<String>,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 1800,
            channel: None,
            conversation_id: None,
        }
    }
}

impl AppConfig {
    /// 工作目录：配置 > 当前目录下的 workspace
    pub fn workspace(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    /// API Key：配置优先，其次环境变量 OPENAI_API_KEY
    pub fn api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
