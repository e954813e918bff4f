//! exec：白名单 Shell 命令
//!
//! 命令按 `;`、`&&`、`||`、`|` 与换行拆成若干段，每段的首词都必须在白名单内；含危险子串（rm -rf、mkfs 等）、
//! 重定向或子 shell 的命令整条拒绝。
//! 通过 sh -c 在工作目录中执行，带自己的超时，输出过长时截断。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "shutdown",
    "reboot",
    ":(){ :|:& };:",
    "$(",
    "`",
];

/// 重定向与子 shell 会绕开逐段检查
const FORBIDDEN_CHARS: &[char] = &['>', '<', '(', ')'];

const MAX_OUTPUT_CHARS: usize = 10_000;

#[derive(Deserialize, JsonSchema)]
struct ExecArgs {
    /// 要执行的命令；每个管道/串联片段的首词都必须在白名单内
    command: String,
}

/// 把命令拆成串联/管道片段
fn segments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| matches!(c, ';' | '|' | '&' | '\n' | '\r'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// 检查命令是否可执行；返回拒绝原因
pub fn check_command(allowed: &HashSet<String>, raw: &str) -> Result<(), String> {
    let lower = raw.to_lowercase();
    if let Some(pattern) = FORBIDDEN_SUBSTR.iter().find(|p| lower.contains(*p)) {
        return Err(format!("Forbidden pattern: {}", pattern));
    }
    if let Some(c) = raw.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("Forbidden character: '{}'", c));
    }
    let mut any = false;
    for segment in segments(&lower) {
        any = true;
        let name = segment.split_whitespace().next().unwrap_or_default();
        if !allowed.contains(name) {
            return Err(format!("Command '{}' not in allowlist", name));
        }
    }
    if any {
        Ok(())
    } else {
        Err("Empty command".to_string())
    }
}

fn truncate(mut text: String) -> String {
    if let Some((idx, _)) = text.char_indices().nth(MAX_OUTPUT_CHARS) {
        text.truncate(idx);
        text.push_str("\n...[truncated]");
    }
    text
}

pub struct ShellTool {
    allowed_commands: HashSet<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            allowed_commands: allowed_commands.into_iter().map(|s| s.to_lowercase()).collect(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a whitelisted shell command in the workspace and return its output."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ExecArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let args: ExecArgs = parse_args(args)?;
        let command = args.command.trim();
        check_command(&self.allowed_commands, command)?;
        tracing::info!(command = %command, channel = %ctx.channel, "exec");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        if self.working_dir.is_dir() {
            cmd.current_dir(&self.working_dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(truncate(format!("exit {}: {}", code, stderr.trim())));
        }
        let text = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else {
            format!("{}\nstderr: {}", stdout.trim_end(), stderr.trim())
        };
        Ok(truncate(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allowed() -> HashSet<String> {
        ["echo", "ls", "grep"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_every_segment_must_be_allowed() {
        let a = allowed();
        assert!(check_command(&a, "echo hi").is_ok());
        assert!(check_command(&a, "LS -la").is_ok());
        assert!(check_command(&a, "ls | grep rs && echo ok").is_ok());
        assert!(check_command(&a, "ls; cat /etc/passwd").unwrap_err().contains("'cat'"));
        assert!(check_command(&a, "ls; rm -rf /").unwrap_err().contains("Forbidden"));
        assert!(check_command(&a, "echo $(whoami)").unwrap_err().contains("Forbidden"));
        assert!(check_command(&a, "  ; ").is_err());
    }

    #[test]
    fn test_newline_and_redirect_cannot_smuggle_commands() {
        let a = allowed();
        assert!(check_command(&a, "ls\nuname").unwrap_err().contains("'uname'"));
        assert!(check_command(&a, "ls\r\ncat x").unwrap_err().contains("'cat'"));
        assert!(check_command(&a, "echo x > out.txt").unwrap_err().contains("'>'"));
        assert!(check_command(&a, "grep x < /etc/shadow").unwrap_err().contains("'<'"));
        assert!(check_command(&a, "(uname)").is_err());
        assert!(check_command(&a, "ls\n\n").is_ok());
    }

    #[test]
    fn test_truncate_long_output() {
        let out = truncate("y".repeat(MAX_OUTPUT_CHARS + 5));
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(truncate("short".into()), "short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_runs_in_workspace() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("marker.txt"), "x").unwrap();
        let t = ShellTool::new(vec!["ls".into()], ws.path(), 5);
        let out = t
            .execute(json!({"command": "ls"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejected_command_is_not_run() {
        let ws = tempfile::tempdir().unwrap();
        let t = ShellTool::new(vec!["ls".into()], ws.path(), 5);
        let err = t
            .execute(json!({"command": "touch created"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.contains("not in allowlist"));
        let err = t
            .execute(json!({"command": "ls\ntouch created"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.contains("'touch'"));
        assert!(!ws.path().join("created").exists());
    }
}
