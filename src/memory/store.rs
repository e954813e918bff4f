//! 文件记忆存储
//!
//! - 长期：memory/MEMORY.md
//! - 每日笔记：memory/YYYY-MM-DD.md（本地日期）

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

/// 记忆条目（来自长期文件或当天笔记的一行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryItem {
    pub kind: MemoryKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Long,
    Today,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Long => "long",
            MemoryKind::Today => "today",
        }
    }
}

/// write_memory 的写入目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTarget {
    Today,
    Long,
}

/// 记忆目录下的文件读写
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            root: workspace.as_ref().join("memory"),
        }
    }

    pub fn long_term_path(&self) -> PathBuf {
        self.root.join("MEMORY.md")
    }

    pub fn today_path(&self) -> PathBuf {
        self.root
            .join(format!("{}.md", Local::now().format("%Y-%m-%d")))
    }

    fn read_trimmed(path: &Path) -> String {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    pub fn read_long_term(&self) -> String {
        Self::read_trimmed(&self.long_term_path())
    }

    pub fn read_today(&self) -> String {
        Self::read_trimmed(&self.today_path())
    }

    /// 注入上下文的记忆文本：长期 + 当天，均为空时返回空串
    pub fn read_context(&self) -> String {
        let mut sections = Vec::new();
        let long = self.read_long_term();
        if !long.is_empty() {
            sections.push(format!("## Long-term Memory\n\n{}", long));
        }
        let today = self.read_today();
        if !today.is_empty() {
            sections.push(format!("## Today's Notes\n\n{}", today));
        }
        sections.join("\n\n")
    }

    /// 两个文件的非空行（去掉列表前缀），供排序器挑选
    pub fn items(&self) -> Vec<MemoryItem> {
        let mut items = Vec::new();
        for (kind, content) in [
            (MemoryKind::Long, self.read_long_term()),
            (MemoryKind::Today, self.read_today()),
        ] {
            for line in content.lines() {
                let text = line
                    .trim()
                    .trim_start_matches(|c| c == '-' || c == '*')
                    .trim();
                if text.is_empty() || text.starts_with('#') {
                    continue;
                }
                items.push(MemoryItem {
                    kind,
                    text: text.to_string(),
                });
            }
        }
        items
    }

    /// 写入记忆：append 为 false 时覆盖整个文件
    pub fn write(&self, target: MemoryTarget, content: &str, append: bool) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        let path = match target {
            MemoryTarget::Today => self.today_path(),
            MemoryTarget::Long => self.long_term_path(),
        };
        if append {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{}", content.trim_end())?;
        } else {
            std::fs::write(&path, format!("{}\n", content.trim_end()))?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_has_no_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        assert!(store.read_context().is_empty());
        assert!(store.items().is_empty());
    }

    #[test]
    fn test_write_then_read_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write(MemoryTarget::Long, "# Facts\n- likes rust", false).unwrap();
        store.write(MemoryTarget::Today, "- meeting at 10", true).unwrap();
        store.write(MemoryTarget::Today, "- bought milk", true).unwrap();

        let items = store.items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], MemoryItem { kind: MemoryKind::Long, text: "likes rust".into() });
        assert_eq!(items[2].text, "bought milk");

        let ctx = store.read_context();
        assert!(ctx.contains("## Long-term Memory"));
        assert!(ctx.contains("meeting at 10"));
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        store.write(MemoryTarget::Long, "old", false).unwrap();
        store.write(MemoryTarget::Long, "new", false).unwrap();
        assert_eq!(store.read_long_term(), "new");
    }
}
