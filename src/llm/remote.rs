//! 远程 OpenAI 兼容 /chat/completions 客户端
//!
//! 通过 reqwest 直接调用任意 OpenAI 兼容端点（可配置 base_url）；附带工具 schema 时解析 tool_calls。
//! 非 2xx 响应保留 HTTP 状态码（LlmError::Api），供上层区分「工具被拒」与其他失败。
//! 不使用 async-openai 的 chat-completion 客户端：它的错误类型不暴露状态码，无法识别 400 / 422。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::llm::{AssistantTurn, ChatBackend, ChatMessage, ChatRequest, LlmError, Role, ToolCallRequest};

/// 允许透传到请求体顶层的采样参数
const PASSTHROUGH_OPTIONS: &[&str] = &[
    "temperature",
    "top_p",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
    "seed",
    "stop",
];

/// 远程客户端：base_url + 可选 API Key（缺失时每次调用返回 NotConfigured）
pub struct RemoteChatBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl RemoteChatBackend {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// 从环境变量读取 API Key
    pub fn from_env(base_url: &str, api_key_env: &str) -> Self {
        Self::new(base_url, std::env::var(api_key_env).ok())
    }

    fn request_body(request: &ChatRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), Value::from(request.model.clone()));
        body.insert(
            "messages".into(),
            Value::Array(request.messages.iter().map(message_to_wire).collect()),
        );
        for key in PASSTHROUGH_OPTIONS {
            if let Some(v) = request.options.get(*key) {
                body.insert((*key).to_string(), v.clone());
            }
        }
        if request.has_tools() {
            body.insert("tools".into(), Value::Array(request.tools.clone()));
        }
        Value::Object(body)
    }
}

fn message_to_wire(m: &ChatMessage) -> Value {
    match m.role {
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    let arguments = match &c.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": arguments },
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": Value::Null, "tool_calls": calls })
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content,
        }),
        _ => json!({ "role": m.role.as_str(), "content": m.content }),
    }
}

/// 解析响应体：有 tool_calls 则返回 ToolCalls，否则返回文本
fn parse_response(raw: &str) -> Result<AssistantTurn, LlmError> {
    let parsed: CompletionResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))?;

    if message.tool_calls.is_empty() {
        return Ok(AssistantTurn::Text(message.content.unwrap_or_default()));
    }

    let calls = message
        .tool_calls
        .into_iter()
        .map(|c| {
            let arguments = if c.function.arguments.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments))
            };
            ToolCallRequest {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();
    Ok(AssistantTurn::ToolCalls(calls))
}

#[async_trait]
impl ChatBackend for RemoteChatBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<AssistantTurn, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured("remote API key missing".to_string()))?;

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&Self::request_body(request))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_response(&text)
    }
}
