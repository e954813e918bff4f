//! write_memory：写入长期记忆或当天笔记

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::{MemoryStore, MemoryTarget};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{Tool, ToolContext};

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum Target {
    Today,
    Long,
}

#[derive(Deserialize, JsonSchema)]
struct WriteMemoryArgs {
    /// today 写入当天笔记，long 写入长期记忆
    target: Target,
    content: String,
    /// 默认追加；为 false 时覆盖整个文件
    #[serde(default = "default_append")]
    append: bool,
}

fn default_append() -> bool {
    true
}

pub struct WriteMemoryTool {
    store: MemoryStore,
}

impl WriteMemoryTool {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for WriteMemoryTool {
    fn name(&self) -> &str {
        "write_memory"
    }

    fn description(&self) -> &str {
        "Remember something: write to today's notes or to long-term memory."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteMemoryArgs>()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let args: WriteMemoryArgs = parse_args(args)?;
        if args.content.trim().is_empty() {
            return Err("content is empty".to_string());
        }
        let target = match args.target {
            Target::Today => MemoryTarget::Today,
            Target::Long => MemoryTarget::Long,
        };
        let path = self
            .store
            .write(target, &args.content, args.append)
            .map_err(|e| format!("write failed: {}", e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(format!("Saved to memory/{}", name))
    }
}
