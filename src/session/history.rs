//! 会话历史：按角色标记的有序对话轮次
//!
//! 只追加；超出上限时丢弃最旧的非 system 轮次，system 轮次始终保留。
//! 剪枝后开头若留下失去对应 assistant 调用的 tool 结果，一并丢弃，保证发给 Provider 的对话合法。

use crate::llm::{Role, Turn};

#[derive(Clone, Debug)]
pub struct History {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl History {
    /// max_turns 为非 system 轮次的上限（0 表示不限制）
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.prune();
    }

    pub fn extend(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
        self.prune();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn prune(&mut self) {
        if self.max_turns == 0 {
            return;
        }
        let mut excess = self
            .turns
            .iter()
            .filter(|t| t.role != Role::System)
            .count()
            .saturating_sub(self.max_turns);
        if excess == 0 {
            return;
        }

        let mut orphan_guard = true;
        self.turns.retain(|t| {
            if t.role == Role::System {
                return true;
            }
            if excess > 0 {
                excess -= 1;
                return false;
            }
            // 剪枝边界后的第一个非 system 轮次若是 tool 结果，它的调用已被丢弃
            if orphan_guard && t.role == Role::Tool {
                return false;
            }
            orphan_guard = false;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use serde_json::json;

    #[test]
    fn test_prune_keeps_system_and_newest() {
        let mut h = History::new(2);
        h.push(Turn::system("rules"));
        h.push(Turn::user("u1"));
        h.push(Turn::assistant("a1"));
        h.push(Turn::user("u2"));

        let contents: Vec<&str> = h.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["rules", "a1", "u2"]);
    }

    #[test]
    fn test_prune_drops_orphan_tool_results() {
        let mut h = History::new(3);
        h.push(Turn::user("u1"));
        h.push(Turn::assistant_with_calls(
            "",
            vec![
                ToolCall::new("c1", "echo", json!({})),
                ToolCall::new("c2", "echo", json!({})),
            ],
        ));
        h.extend(vec![
            Turn::tool_result("c1", "r1"),
            Turn::tool_result("c2", "r2"),
            Turn::assistant("done"),
        ]);

        // 超出 2 条：u1 与 assistant 调用被剪掉，随后 r1/r2 成为孤儿
        assert_eq!(h.len(), 1);
        assert_eq!(h.turns()[0].content, "done");
    }

    #[test]
    fn test_zero_limit_means_unbounded() {
        let mut h = History::new(0);
        for i in 0..100 {
            h.push(Turn::user(format!("m{}", i)));
        }
        assert_eq!(h.len(), 100);
    }
}
