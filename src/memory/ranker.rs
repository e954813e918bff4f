//! 记忆排序：为当前输入挑选最相关的 top-K 条目

use std::collections::HashSet;

use super::store::MemoryItem;

/// 排序器：按与 query 的相关度返回至多 top_k 条
pub trait Ranker: Send + Sync {
    fn rank(&self, query: &str, items: &[MemoryItem], top_k: usize) -> Vec<MemoryItem>;
}

/// 关键词重叠排序：小写分词后按共同词数打分，零分丢弃，同分保持原顺序
#[derive(Debug, Default, Clone)]
pub struct KeywordRanker;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

impl Ranker for KeywordRanker {
    fn rank(&self, query: &str, items: &[MemoryItem], top_k: usize) -> Vec<MemoryItem> {
        let query = tokens(query);
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, &MemoryItem)> = items
            .iter()
            .map(|item| (tokens(&item.text).intersection(&query).count(), item))
            .filter(|(score, _)| *score > 0)
            .collect();
        // sort_by 是稳定排序
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKind;

    fn item(text: &str) -> MemoryItem {
        MemoryItem {
            kind: MemoryKind::Long,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_rank_by_overlap_and_drop_zero() {
        let items = vec![
            item("the cat sleeps"),
            item("Rust borrow checker"),
            item("rust async runtime tokio"),
            item("weather is nice"),
        ];
        let ranked = KeywordRanker.rank("how does Rust async work", &items, 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].text, "rust async runtime tokio");
        assert_eq!(ranked[1].text, "Rust borrow checker");
    }

    #[test]
    fn test_ties_keep_original_order_and_top_k() {
        let items = vec![item("alpha one"), item("alpha two"), item("alpha three")];
        let ranked = KeywordRanker.rank("alpha", &items, 2);
        assert_eq!(ranked, vec![item("alpha one"), item("alpha two")]);
    }
}
