//! 上下文组装
//!
//! 把静态指令、工作目录引导文件、记忆、技能目录、会话历史与当前输入按固定顺序拼成发给 Provider 的对话。
//! 可选输入缺失（文件不存在、记忆为空、技能加载失败）时直接省略，不报错。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::llm::Turn;
use crate::memory::{KeywordRanker, MemoryItem, Ranker};

/// 默认系统提示
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hive, a helpful personal assistant. \
Answer concisely and use your tools when the user asks you to act.";

/// 按顺序尝试加载的引导文件
pub const BOOTSTRAP_FILES: [&str; 4] = ["SOUL.md", "AGENTS.md", "USER.md", "TOOLS.md"];

const MEMORY_TOOL_INSTRUCTION: &str = "If you decide something should be remembered, call the tool \
'write_memory' with JSON arguments: {\"target\": \"today\"|\"long\", \"content\": \"...\", \"append\": true|false}. \
Use a tool call rather than plain chat text when writing memory.";

/// 一次组装的全部输入
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInputs<'a> {
    pub history: &'a [Turn],
    pub current_text: &'a str,
    pub channel: &'a str,
    pub conversation_id: &'a str,
    pub memory_context: &'a str,
    /// 候选记忆，组装时再按 current_text 排序取 top-K
    pub memories: &'a [MemoryItem],
    pub skills_catalog: Option<&'a str>,
}

/// 上下文组装器
pub struct ContextBuilder {
    workspace: PathBuf,
    system_prompt: String,
    ranker: Arc<dyn Ranker>,
    top_k: usize,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            ranker: Arc::new(KeywordRanker),
            top_k: 5,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>, top_k: usize) -> Self {
        self.ranker = ranker;
        self.top_k = top_k;
        self
    }

    fn bootstrap_turns(&self) -> Vec<Turn> {
        BOOTSTRAP_FILES
            .iter()
            .filter_map(|name| {
                let content = std::fs::read_to_string(self.workspace.join(name)).ok()?;
                let content = content.trim();
                if content.is_empty() {
                    return None;
                }
                Some(Turn::system(format!("## {}\n\n{}", name, content)))
            })
            .collect()
    }

    /// 组装对话
    pub fn build(&self, inputs: ContextInputs<'_>) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(inputs.history.len() + 10);

        turns.push(Turn::system(self.system_prompt.clone()));
        turns.extend(self.bootstrap_turns());

        turns.push(Turn::system(format!(
            "You are operating on channel={:?} conversation={:?}. You have access to all registered tools \
regardless of the channel. Use your tools when the user asks you to perform actions.",
            inputs.channel, inputs.conversation_id
        )));
        turns.push(Turn::system(MEMORY_TOOL_INSTRUCTION));

        if let Some(catalog) = inputs.skills_catalog.filter(|c| !c.trim().is_empty()) {
            turns.push(Turn::system(catalog));
        }

        if !inputs.memory_context.trim().is_empty() {
            turns.push(Turn::system(format!("Memory:\n{}", inputs.memory_context)));
        }

        let selected = self
            .ranker
            .rank(inputs.current_text, inputs.memories, self.top_k);
        if !selected.is_empty() {
            let mut block = String::from("Relevant memories:\n");
            for m in &selected {
                block.push_str(&format!("- {} ({})\n", m.text, m.kind.as_str()));
            }
            turns.push(Turn::system(block));
        }

        turns.extend(inputs.history.iter().cloned());
        turns.push(Turn::user(inputs.current_text));
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::memory::MemoryKind;

    #[test]
    fn test_minimal_context_order() {
        let ws = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(ws.path()).with_system_prompt("sys");
        let history = vec![Turn::user("earlier"), Turn::assistant("reply")];
        let turns = builder.build(ContextInputs {
            history: &history,
            current_text: "now",
            channel: "x",
            conversation_id: "c1",
            ..Default::default()
        });

        assert_eq!(turns[0].content, "sys");
        assert!(turns[1].content.contains("channel=\"x\""));
        assert!(turns[2].content.contains("write_memory"));
        assert_eq!(turns[3].content, "earlier");
        assert_eq!(turns[4].role, Role::Assistant);
        assert_eq!(turns.last().unwrap().content, "now");
        assert_eq!(turns.len(), 6);
    }

    #[test]
    fn test_optional_sections_in_order() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("SOUL.md"), "be kind").unwrap();
        std::fs::write(ws.path().join("USER.md"), "   ").unwrap();
        let memories = vec![
            MemoryItem { kind: MemoryKind::Long, text: "user likes tea".into() },
            MemoryItem { kind: MemoryKind::Today, text: "dentist at 3".into() },
        ];
        let builder = ContextBuilder::new(ws.path()).with_system_prompt("sys");
        let turns = builder.build(ContextInputs {
            current_text: "make tea",
            memory_context: "## Long-term Memory\n\nuser likes tea",
            memories: &memories,
            skills_catalog: Some("Available Skills:\n\n## Weather\n"),
            ..Default::default()
        });

        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents[1], "## SOUL.md\n\nbe kind");
        assert!(contents[4].starts_with("Available Skills:"));
        assert!(contents[5].starts_with("Memory:\n"));
        assert_eq!(contents[6], "Relevant memories:\n- user likes tea (long)\n");
        assert_eq!(contents[7], "make tea");
        // 空白的 USER.md 被省略
        assert!(!contents.iter().any(|c| c.contains("USER.md")));
    }
}
