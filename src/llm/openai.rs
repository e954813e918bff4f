//! OpenAI 兼容 API Provider
//!
//! 通过 reqwest 调用任意 OpenAI 兼容端点（OpenAI、OpenRouter、本地 Ollama 等），
//! 使用 `tools` 数组声明工具；工具调用参数是 JSON 字符串，解析失败的调用被跳过。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{LlmError, LlmProvider};
use super::types::{ProviderResponse, ToolCall, ToolDefinition, Turn};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireToolCallFunction,
}

#[derive(Serialize, Deserialize)]
struct WireToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

/// OpenAI 兼容 Provider：持有 HTTP 客户端、端点与密钥
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: Option<&str>, timeout_secs: u64) -> Self {
        let api_base = api_base
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let timeout_secs = if timeout_secs <= 1 { 60 } else { timeout_secs };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.to_string(),
            api_base,
            default_model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    fn to_wire_messages(turns: &[Turn]) -> Vec<WireMessage> {
        turns
            .iter()
            .map(|t| WireMessage {
                role: t.role.as_str(),
                content: t.content.clone(),
                tool_call_id: t.tool_call_id.clone(),
                tool_calls: t
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: function_kind(),
                        function: WireToolCallFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn to_wire_tools(tools: &[ToolDefinition]) -> Vec<WireTool<'_>> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect()
    }

    fn is_local_base(&self) -> bool {
        self.api_base != DEFAULT_API_BASE
    }
}

/// 把响应消息转为 ProviderResponse；无法解析参数的工具调用被跳过
fn parse_response_message(msg: ResponseMessage) -> ProviderResponse {
    let content = msg.content.unwrap_or_default().trim().to_string();
    let calls: Vec<ToolCall> = msg
        .tool_calls
        .into_iter()
        .filter_map(|tc| {
            let raw = if tc.function.arguments.trim().is_empty() {
                "{}"
            } else {
                tc.function.arguments.as_str()
            };
            match serde_json::from_str::<Value>(raw) {
                Ok(args) => Some(ToolCall::new(tc.id, tc.function.name, args)),
                Err(e) => {
                    tracing::warn!(tool = %tc.function.name, error = %e, "skipping tool call with unparseable arguments");
                    None
                }
            }
        })
        .collect();
    ProviderResponse::with_tool_calls(content, calls)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        turns: &[Turn],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<ProviderResponse, LlmError> {
        // 本地端点（如 Ollama）可以不带密钥
        if self.api_key.is_empty() && !self.is_local_base() {
            return Err(LlmError::NotConfigured("API key is not configured".to_string()));
        }
        let model = if model.is_empty() { self.default_model.as_str() } else { model };

        let request = ChatRequest {
            model,
            messages: Self::to_wire_messages(turns),
            tools: Self::to_wire_tools(tools),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| LlmError::Http(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default().trim().to_string();
            tracing::warn!(status = %status, body = %body, "chat completion returned non-2xx");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let out: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let choice = out
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;

        Ok(parse_response_message(choice.message))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_messages_carry_tool_calls() {
        let turns = vec![
            Turn::user("hi"),
            Turn::assistant_with_calls("", vec![ToolCall::new("c1", "echo", json!({"text": "x"}))]),
            Turn::tool_result("c1", "x"),
        ];
        let wire = serde_json::to_value(OpenAiProvider::to_wire_messages(&turns)).unwrap();
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "echo");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], "{\"text\":\"x\"}");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "c1");
        assert!(wire[0].get("tool_calls").is_none());
    }

    #[test]
    fn test_parse_skips_unparseable_arguments() {
        let raw = json!({
            "content": "  thinking  ",
            "tool_calls": [
                {"id": "a", "type": "function", "function": {"name": "echo", "arguments": "{\"text\":\"1\"}"}},
                {"id": "b", "type": "function", "function": {"name": "echo", "arguments": "{not json"}}
            ]
        });
        let msg: ResponseMessage = serde_json::from_value(raw).unwrap();
        let resp = parse_response_message(msg);
        assert_eq!(resp.content, "thinking");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "a");
        assert!(resp.has_tool_calls());
    }

    #[test]
    fn test_parse_plain_content() {
        let msg: ResponseMessage = serde_json::from_value(json!({"content": "hello"})).unwrap();
        let resp = parse_response_message(msg);
        assert_eq!(resp, ProviderResponse::text("hello"));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let provider = OpenAiProvider::new("", None, None, 5);
        let err = provider.chat(&[Turn::user("hi")], &[], "").await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }

    #[test]
    fn test_api_base_is_normalized() {
        let provider = OpenAiProvider::new("k", Some("http://localhost:11434/v1/"), Some("llama3"), 30);
        assert_eq!(provider.api_base, "http://localhost:11434/v1");
        assert_eq!(provider.default_model(), "llama3");
    }
}
