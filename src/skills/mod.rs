//! 技能系统
//!
//! 技能（Skill）是一段能力描述，渲染进系统提示，告诉模型在什么场景下如何组合工具。
//!
//! 目录结构：
//! ```text
//! workspace/skills/
//! ├── weather/
//! │   ├── skill.toml      # 技能元数据
//! │   └── capability.md   # 能力描述（可选）
//! └── ...
//! ```

mod loader;

pub use loader::{render_catalog, Skill, SkillLoader, SkillMeta};
