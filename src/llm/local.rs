//! 本地推理后端（Ollama 兼容 /api/chat）
//!
//! 只做纯文本对话：请求中的工具 schema 一律不发送（能力受限，由 ChatBackendAdapter 负责告警）。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{AssistantTurn, ChatBackend, ChatMessage, ChatRequest, LlmError};

/// 本地推理客户端：持有 HTTP Client 与服务地址
pub struct LocalChatBackend {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl LocalChatBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn to_wire(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }
}

#[async_trait]
impl ChatBackend for LocalChatBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<AssistantTurn, LlmError> {
        let body = json!({
            "model": request.model,
            "messages": Self::to_wire(&request.messages),
            "stream": false,
            "options": request.options,
        });

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::InvalidResponse("missing message".to_string()))?;
        Ok(AssistantTurn::Text(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallRequest;

    #[test]
    fn test_wire_messages_are_text_only() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant_tool_calls(vec![ToolCallRequest {
                id: "c1".into(),
                name: "calculator".into(),
                arguments: json!({"expression": "1+1"}),
            }]),
            ChatMessage::tool_result("c1", "2"),
        ];
        let wire = LocalChatBackend::to_wire(&messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["content"], "2");
        assert!(wire[1].get("tool_calls").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let backend = LocalChatBackend::new("http://localhost:11434/");
        assert_eq!(backend.base_url, "http://localhost:11434");
    }
}
