//! 记忆：长期文件 + 每日笔记，以及相关记忆排序

pub mod ranker;
pub mod store;

pub use ranker::{KeywordRanker, Ranker};
pub use store::{MemoryItem, MemoryKind, MemoryStore, MemoryTarget};
