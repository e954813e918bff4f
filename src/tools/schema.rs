//! 工具参数 JSON Schema 生成
//!
//! 参数结构体派生 JsonSchema，由 schemars 生成 schema 作为 ToolDefinition.parameters，
//! 执行时再用 serde 反序列化同一个结构体，保证目录与解析一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 参数结构体的 JSON Schema（去掉 $schema / title 等与调用无关的元字段）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 把模型给出的参数解析成结构体；失败时返回给模型可读的错误
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Args {
        /// 文件路径
        path: String,
        #[serde(default)]
        append: bool,
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = schema_of::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["path"].is_object());
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_parse_args_reports_missing_field() {
        let err = parse_args::<Args>(serde_json::json!({"append": true})).err().unwrap();
        assert!(err.contains("path"));
    }
}
