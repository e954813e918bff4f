//! 技能加载器
//!
//! 从 workspace/skills/ 目录加载技能：每个子目录一个 skill.toml，可选 capability.md。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// 技能元数据（skill.toml 的 [skill] 段）
#[derive(Debug, Clone, Deserialize)]
pub struct SkillMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillToml {
    skill: SkillMeta,
}

/// 完整技能数据
#[derive(Debug, Clone)]
pub struct Skill {
    pub meta: SkillMeta,
    pub capability: String,
    pub dir: PathBuf,
}

impl Skill {
    /// 目录中的一节：名称、描述、能力说明
    pub fn catalog_entry(&self) -> String {
        format!(
            "## {}\n{}\n\n{}",
            self.meta.name,
            self.meta.description,
            self.capability.trim()
        )
    }
}

/// 渲染技能目录；没有技能时返回 None
pub fn render_catalog(skills: &[Skill]) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    let mut out = String::from("Available Skills:\n");
    for skill in skills {
        out.push('\n');
        out.push_str(&skill.catalog_entry());
        out.push('\n');
    }
    Some(out)
}

/// 技能加载器
#[derive(Debug, Clone)]
pub struct SkillLoader {
    skills_dir: PathBuf,
}

impl SkillLoader {
    pub fn new(skills_dir: impl AsRef<Path>) -> Self {
        Self {
            skills_dir: skills_dir.as_ref().to_path_buf(),
        }
    }

    /// 工作目录下的 skills/
    pub fn for_workspace(workspace: impl AsRef<Path>) -> Self {
        Self::new(workspace.as_ref().join("skills"))
    }

    /// 加载所有技能，按目录名排序；单个技能解析失败只记录不中断
    pub fn load_all(&self) -> anyhow::Result<Vec<Skill>> {
        let mut skills = Vec::new();

        if !self.skills_dir.exists() {
            return Ok(skills);
        }

        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.skills_dir)
            .with_context(|| format!("reading {}", self.skills_dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            match self.load_skill(&dir) {
                Ok(Some(skill)) => skills.push(skill),
                Ok(None) => {}
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "skipping invalid skill"),
            }
        }

        tracing::debug!("Loaded {} skills", skills.len());
        Ok(skills)
    }

    /// 加载单个技能；没有 skill.toml 的目录不是技能
    fn load_skill(&self, dir: &Path) -> anyhow::Result<Option<Skill>> {
        let skill_toml = dir.join("skill.toml");
        if !skill_toml.exists() {
            return Ok(None);
        }

        let toml_content = std::fs::read_to_string(&skill_toml)
            .with_context(|| format!("reading {}", skill_toml.display()))?;
        let skill_data: SkillToml = toml::from_str(&toml_content)
            .with_context(|| format!("parsing {}", skill_toml.display()))?;

        let capability = std::fs::read_to_string(dir.join("capability.md")).unwrap_or_default();

        Ok(Some(Skill {
            meta: skill_data.skill,
            capability,
            dir: dir.to_path_buf(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir: &str, toml: &str, capability: Option<&str>) {
        let d = root.join("skills").join(dir);
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join("skill.toml"), toml).unwrap();
        if let Some(c) = capability {
            std::fs::write(d.join("capability.md"), c).unwrap();
        }
    }

    #[test]
    fn test_load_and_render_catalog() {
        let ws = tempfile::tempdir().unwrap();
        write_skill(
            ws.path(),
            "weather",
            "[skill]\nid = \"weather\"\nname = \"Weather\"\ndescription = \"Look up forecasts\"\ntags = [\"web\"]\n",
            Some("Use web_fetch on wttr.in"),
        );
        write_skill(ws.path(), "broken", "not = [valid", None);
        std::fs::create_dir_all(ws.path().join("skills").join("empty")).unwrap();

        let skills = SkillLoader::for_workspace(ws.path()).load_all().unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].meta.tags, vec!["web".to_string()]);

        let catalog = render_catalog(&skills).unwrap();
        assert!(catalog.starts_with("Available Skills:\n"));
        assert!(catalog.contains("## Weather\nLook up forecasts\n\nUse web_fetch on wttr.in"));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let ws = tempfile::tempdir().unwrap();
        let skills = SkillLoader::for_workspace(ws.path()).load_all().unwrap();
        assert!(skills.is_empty());
        assert!(render_catalog(&skills).is_none());
    }
}
