//! cron：让模型为当前会话增删查定时任务

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::scheduler::{CronService, Schedule};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum Action {
    Add,
    List,
    Remove,
}

#[derive(Deserialize, JsonSchema)]
struct CronArgs {
    action: Action,
    /// add：任务名
    #[serde(default)]
    name: Option<String>,
    /// add：触发时交给助手处理的文本
    #[serde(default)]
    message: Option<String>,
    /// add：间隔秒数（与 cron_expr / at 三选一）
    #[serde(default)]
    every_seconds: Option<u64>,
    /// add：cron 表达式，如 "0 9 * * *"
    #[serde(default)]
    cron_expr: Option<String>,
    /// add：一次性触发的 RFC 3339 时间
    #[serde(default)]
    at: Option<String>,
    /// remove：任务 ID
    #[serde(default)]
    id: Option<String>,
}

pub struct CronTool {
    service: Arc<CronService>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self { service }
    }

    fn schedule_from(args: &CronArgs) -> Result<Schedule, String> {
        match (args.every_seconds, args.cron_expr.as_deref(), args.at.as_deref()) {
            (Some(seconds), None, None) => Ok(Schedule::Every { seconds }),
            (None, Some(expr), None) => Ok(Schedule::Cron { expr: expr.to_string() }),
            (None, None, Some(at)) => DateTime::parse_from_rfc3339(at)
                .map(|t| Schedule::At { at: t.with_timezone(&Utc) })
                .map_err(|e| format!("invalid 'at' time: {}", e)),
            _ => Err("exactly one of every_seconds, cron_expr, at is required".to_string()),
        }
    }
}

#[async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule reminders or recurring tasks for this conversation (add, list, remove)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CronArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let args: CronArgs = parse_args(args)?;
        match args.action {
            Action::Add => {
                let message = args
                    .message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .ok_or("message is required")?;
                let schedule = Self::schedule_from(&args)?;
                let name = args.name.clone().unwrap_or_else(|| message.chars().take(30).collect());
                let job = self
                    .service
                    .add_job(name, message, &ctx.channel, &ctx.conversation_id, schedule)
                    .map_err(|e| e.to_string())?;
                let next = job
                    .next_run
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                Ok(format!("Created job {} ({}), next run {}", job.id, job.name, next))
            }
            Action::List => {
                let jobs = self
                    .service
                    .list_jobs(Some((ctx.channel.as_str(), ctx.conversation_id.as_str())));
                if jobs.is_empty() {
                    return Ok("No scheduled jobs.".to_string());
                }
                Ok(jobs
                    .iter()
                    .map(|j| format!("{} {} {:?}", j.id, j.name, j.schedule))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Action::Remove => {
                let id = args.id.ok_or("id is required")?;
                let owned = self
                    .service
                    .list_jobs(Some((ctx.channel.as_str(), ctx.conversation_id.as_str())))
                    .iter()
                    .any(|j| j.id == id);
                if owned && self.service.remove_job(&id) {
                    Ok(format!("Removed job {}", id))
                } else {
                    Err(format!("No job {} in this conversation", id))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageHub;
    use serde_json::json;

    #[tokio::test]
    async fn test_add_list_remove_scoped_to_conversation() {
        let hub = Arc::new(MessageHub::default());
        let service = Arc::new(CronService::in_memory(hub));
        let tool = CronTool::new(Arc::clone(&service));
        let mine = ToolContext::new("telegram", "1", "u1");
        let theirs = ToolContext::new("telegram", "2", "u2");

        let out = tool
            .execute(json!({"action": "add", "message": "stand up", "every_seconds": 3600}), &mine)
            .await
            .unwrap();
        assert!(out.starts_with("Created job"));
        let id = service.list_jobs(None)[0].id.clone();

        assert_eq!(
            tool.execute(json!({"action": "list"}), &theirs).await.unwrap(),
            "No scheduled jobs."
        );
        assert!(tool
            .execute(json!({"action": "remove", "id": id}), &theirs)
            .await
            .is_err());
        assert!(tool
            .execute(json!({"action": "remove", "id": id}), &mine)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_add_requires_single_schedule() {
        let service = Arc::new(CronService::in_memory(Arc::new(MessageHub::default())));
        let tool = CronTool::new(service);
        let ctx = ToolContext::new("console", "local", "me");
        let err = tool
            .execute(
                json!({"action": "add", "message": "x", "every_seconds": 5, "cron_expr": "* * * * *"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.contains("exactly one"));
    }

    #[tokio::test]
    async fn test_oversized_interval_is_error_not_panic() {
        let service = Arc::new(CronService::in_memory(Arc::new(MessageHub::default())));
        let tool = CronTool::new(Arc::clone(&service));
        let ctx = ToolContext::new("console", "local", "me");
        let err = tool
            .execute(
                json!({"action": "add", "message": "x", "every_seconds": 10_000_000_000_000u64}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.contains("every.seconds"));
        assert!(service.list_jobs(None).is_empty());
    }
}
