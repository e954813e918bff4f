//! 沙箱文件系统工具
//!
//! SafeFs 绑定工作目录，所有路径必须落在根下（禁止 ../ 与绝对路径逃逸）；
//! read_file / write_file / list_dir 三个工具基于 SafeFs。

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

/// 沙箱文件系统：绑定根目录，校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 校验已存在的路径在沙箱内（解析符号链接后比较）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }

    /// 校验待写入的路径：文件可以不存在，但不能含 .. 或绝对路径，已存在的父目录也必须在根下
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, AgentError> {
        let rel = Path::new(path.trim_start_matches("./"));
        if rel.as_os_str().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(AgentError::PathEscape(path.to_string()));
        }
        let full = self.root_dir.join(rel);
        let mut existing = full.parent();
        while let Some(dir) = existing {
            if dir.exists() {
                let canonical = dir
                    .canonicalize()
                    .map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
                if !canonical.starts_with(&self.root_dir) {
                    return Err(AgentError::PathEscape(path.to_string()));
                }
                break;
            }
            existing = dir.parent();
        }
        Ok(full)
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    pub fn write_file(&self, path: &str, content: &str, append: bool) -> Result<usize, AgentError> {
        let target = self.resolve_for_write(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&target)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        file.write_all(content.as_bytes())
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(content.len())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path)?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[derive(Deserialize, JsonSchema)]
struct ReadArgs {
    /// 相对工作目录的文件路径
    path: String,
}

/// read_file：读取文件内容
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: ReadArgs = parse_args(args)?;
        tracing::debug!(path = %args.path, "read_file");
        self.fs.read_file(&args.path).map_err(|e| e.to_string())
    }
}

#[derive(Deserialize, JsonSchema)]
struct WriteArgs {
    /// 相对工作目录的文件路径，父目录会自动创建
    path: String,
    content: String,
    /// 为 true 时追加，否则覆盖
    #[serde(default)]
    append: bool,
}

/// write_file：写入或追加文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (or append to) a file in the workspace."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: WriteArgs = parse_args(args)?;
        tracing::debug!(path = %args.path, append = args.append, "write_file");
        let n = self
            .fs
            .write_file(&args.path, &args.content, args.append)
            .map_err(|e| e.to_string())?;
        Ok(format!("Wrote {} bytes to {}", n, args.path))
    }
}

#[derive(Deserialize, JsonSchema)]
struct ListArgs {
    /// 目录路径，默认工作目录根
    #[serde(default)]
    path: Option<String>,
}

/// list_dir：列出目录
pub struct ListDirTool {
    fs: SafeFs,
}

impl ListDirTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory in the workspace (directories end with '/')."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: ListArgs = parse_args(args)?;
        let path = args.path.unwrap_or_else(|| ".".to_string());
        let entries = self.fs.list_dir(&path).map_err(|e| e.to_string())?;
        if entries.is_empty() {
            return Ok("(empty)".to_string());
        }
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_read_list_round_trip() {
        let ws = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(ws.path());
        let ctx = ToolContext::default();

        WriteFileTool::new(fs.clone())
            .execute(json!({"path": "notes/a.txt", "content": "one\n"}), &ctx)
            .await
            .unwrap();
        WriteFileTool::new(fs.clone())
            .execute(json!({"path": "notes/a.txt", "content": "two\n", "append": true}), &ctx)
            .await
            .unwrap();

        let text = ReadFileTool::new(fs.clone())
            .execute(json!({"path": "notes/a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(text, "one\ntwo\n");

        let listing = ListDirTool::new(fs).execute(json!({}), &ctx).await.unwrap();
        assert_eq!(listing, "notes/");
    }

    #[test]
    fn test_escapes_are_rejected() {
        let ws = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(ws.path());
        assert!(matches!(fs.resolve_for_write("../evil.txt"), Err(AgentError::PathEscape(_))));
        assert!(matches!(fs.resolve_for_write("/etc/passwd"), Err(AgentError::PathEscape(_))));
        assert!(fs.resolve("../../etc/passwd").is_err());
        assert!(fs.resolve_for_write("ok/file.txt").is_ok());
    }
}
