//! CronService：按计划向 Hub 发布任务消息
//!
//! 三种计划：every（固定间隔）、at（一次性，触发后删除）、cron（5 段或 6/7 段表达式）。
//! 任务持久化到 workspace/cron/jobs.json；每个 tick 发布到期任务，即使被跳过也推进 next_run。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{FireOutcome, TriggerSlot};
use crate::bus::{InboundMessage, MessageHub};
use crate::core::AgentError;

/// cron 任务发布的入站消息使用的发送者 ID
pub const CRON_SENDER: &str = "cron";

/// every 计划允许的最长间隔（一年）
pub const MAX_EVERY_SECS: u64 = 366 * 24 * 3600;

/// 任务计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Every { seconds: u64 },
    At { at: DateTime<Utc> },
    Cron { expr: String },
}

/// 5 段表达式（分 时 日 月 周）补上秒字段
fn parse_expr(expr: &str) -> Result<::cron::Schedule, AgentError> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    ::cron::Schedule::from_str(&normalized)
        .map_err(|e| AgentError::ConfigError(format!("invalid cron expression '{}': {}", expr, e)))
}

impl Schedule {
    pub fn validate(&self) -> Result<(), AgentError> {
        match self {
            Schedule::Every { seconds: 0 } => {
                Err(AgentError::ConfigError("every.seconds must be positive".to_string()))
            }
            Schedule::Every { seconds } if *seconds > MAX_EVERY_SECS => Err(AgentError::ConfigError(format!(
                "every.seconds must be at most {}",
                MAX_EVERY_SECS
            ))),
            Schedule::Cron { expr } => parse_expr(expr).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// now 之后的下一次触发时间；一次性任务已过期时仍返回原时间（下个 tick 立即触发）
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every { seconds } => {
                let secs = i64::try_from((*seconds).max(1)).ok()?;
                now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
            }
            Schedule::At { at } => Some(*at),
            Schedule::Cron { expr } => parse_expr(expr).ok()?.after(&now).next(),
        }
    }

    fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }
}

/// 定时任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    /// 触发时作为用户输入发给 Agent 的文本
    pub message: String,
    pub channel: String,
    pub conversation_id: String,
    pub schedule: Schedule,
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(skip)]
    slot: TriggerSlot,
}

fn enabled_default() -> bool {
    true
}

#[derive(Serialize, Deserialize, Default)]
struct JobFile {
    #[serde(default)]
    jobs: Vec<CronJob>,
}

/// 定时任务服务
pub struct CronService {
    jobs: Mutex<Vec<CronJob>>,
    store_path: Option<PathBuf>,
    hub: Arc<MessageHub>,
}

impl CronService {
    /// 不持久化的服务（测试用）
    pub fn in_memory(hub: Arc<MessageHub>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            store_path: None,
            hub,
        }
    }

    /// workspace/cron/jobs.json 的路径
    pub fn store_path_for(workspace: impl AsRef<Path>) -> PathBuf {
        workspace.as_ref().join("cron").join("jobs.json")
    }

    /// 从文件加载任务；文件不存在时为空，内容非法或表达式非法时作为配置错误返回
    pub fn load(store_path: impl AsRef<Path>, hub: Arc<MessageHub>) -> Result<Self, AgentError> {
        let store_path = store_path.as_ref().to_path_buf();
        let mut jobs = if store_path.exists() {
            let raw = std::fs::read_to_string(&store_path)
                .map_err(|e| AgentError::ConfigError(format!("reading {}: {}", store_path.display(), e)))?;
            serde_json::from_str::<JobFile>(&raw)
                .map_err(|e| AgentError::ConfigError(format!("parsing {}: {}", store_path.display(), e)))?
                .jobs
        } else {
            Vec::new()
        };

        let now = Utc::now();
        for job in &mut jobs {
            job.schedule.validate()?;
            if job.next_run.is_none() {
                job.next_run = job.schedule.next_after(now);
            }
        }
        tracing::info!(count = jobs.len(), path = %store_path.display(), "cron jobs loaded");

        Ok(Self {
            jobs: Mutex::new(jobs),
            store_path: Some(store_path),
            hub,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CronJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, jobs: &[CronJob]) {
        let Some(path) = &self.store_path else {
            return;
        };
        let file = JobFile { jobs: jobs.to_vec() };
        let result = serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json)
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist cron jobs");
        }
    }

    /// 新增任务，返回任务快照
    pub fn add_job(
        &self,
        name: impl Into<String>,
        message: impl Into<String>,
        channel: impl Into<String>,
        conversation_id: impl Into<String>,
        schedule: Schedule,
    ) -> Result<CronJob, AgentError> {
        schedule.validate()?;
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let job = CronJob {
            id,
            name: name.into(),
            message: message.into(),
            channel: channel.into(),
            conversation_id: conversation_id.into(),
            next_run: schedule.next_after(Utc::now()),
            schedule,
            enabled: true,
            slot: TriggerSlot::new(),
        };
        let mut jobs = self.lock();
        jobs.push(job.clone());
        self.persist(&jobs);
        tracing::info!(id = %job.id, name = %job.name, "cron job added");
        Ok(job)
    }

    /// 列出任务；给出 (channel, conversation_id) 时只列该会话的任务
    pub fn list_jobs(&self, owner: Option<(&str, &str)>) -> Vec<CronJob> {
        self.lock()
            .iter()
            .filter(|j| match owner {
                Some((ch, conv)) => j.channel == ch && j.conversation_id == conv,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// 删除任务；不存在时返回 false
    pub fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        let removed = jobs.len() != before;
        if removed {
            self.persist(&jobs);
        }
        removed
    }

    /// 发布所有到期任务，返回成功发布的任务 ID
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut jobs = self.lock();
        let mut fired = Vec::new();
        let mut changed = false;

        for job in jobs.iter_mut() {
            if !job.enabled || job.next_run.map(|t| t > now).unwrap_or(true) {
                continue;
            }
            let msg = InboundMessage::new(&job.channel, CRON_SENDER, &job.conversation_id, &job.message);
            let outcome = job.slot.fire(&self.hub, msg);
            match outcome {
                FireOutcome::Published => {
                    tracing::info!(id = %job.id, name = %job.name, "cron job fired");
                    fired.push(job.id.clone());
                }
                FireOutcome::Skipped => {
                    tracing::info!(id = %job.id, "previous run still in progress, skipping tick");
                }
                FireOutcome::Dropped => {}
            }
            if job.schedule.is_one_shot() {
                // 一次性任务被 Hub 拒收时保留，下个 tick 重试
                if outcome != FireOutcome::Dropped {
                    job.enabled = false;
                }
            } else {
                job.next_run = job.schedule.next_after(now);
            }
            changed = true;
        }

        let before = jobs.len();
        jobs.retain(|j| j.enabled || !j.schedule.is_one_shot());
        if changed || jobs.len() != before {
            self.persist(&jobs);
        }
        fired
    }

    /// 每 tick 检查一次到期任务，直到取消
    pub async fn run(self: Arc<Self>, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick.max(Duration::from_millis(10)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.fire_due(Utc::now());
                }
            }
        }
        tracing::debug!("cron service stopped");
    }
}
