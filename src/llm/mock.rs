//! 测试用后端与嵌入器（无需网络）
//!
//! ScriptedBackend 按顺序返回预设结果并记录收到的请求；脚本耗尽后返回默认回合（未设置则报错）。
//! MockEmbedder 按文本内容确定性地生成向量。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{AssistantTurn, ChatBackend, ChatRequest, Embedder, LlmError};

/// 脚本化后端
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<AssistantTurn, LlmError>>>,
    default_turn: Option<AssistantTurn>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本耗尽后总是返回 turn
    pub fn with_default(turn: AssistantTurn) -> Self {
        Self {
            default_turn: Some(turn),
            ..Self::default()
        }
    }

    /// 追加一条脚本结果
    pub async fn push(&self, result: Result<AssistantTurn, LlmError>) {
        self.script.lock().await.push_back(result);
    }

    /// 已收到的请求（按时间顺序）
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<AssistantTurn, LlmError> {
        self.requests.lock().await.push(request.clone());
        if let Some(next) = self.script.lock().await.pop_front() {
            return next;
        }
        self.default_turn
            .clone()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

/// 确定性嵌入器：向量第 i 维为文本中 (byte % dim == i) 的字节数，可选固定失败
pub struct MockEmbedder {
    dimension: usize,
    fail: bool,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
        }
    }

    /// 每次调用都失败
    pub fn failing() -> Self {
        Self {
            dimension: 0,
            fail: true,
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail || self.dimension == 0 {
            return Err(LlmError::Transport("embedding service unavailable".to_string()));
        }
        let mut v = vec![0.0f32; self.dimension];
        for b in text.bytes() {
            v[b as usize % self.dimension] += 1.0;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use serde_json::Map;

    #[tokio::test]
    async fn test_scripted_backend_order_and_default() {
        let backend = ScriptedBackend::with_default(AssistantTurn::Text("default".into()));
        backend.push(Ok(AssistantTurn::Text("first".into()))).await;
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("q")],
            options: Map::new(),
            tools: vec![],
        };
        assert_eq!(backend.chat(&request).await.unwrap(), AssistantTurn::Text("first".into()));
        assert_eq!(backend.chat(&request).await.unwrap(), AssistantTurn::Text("default".into()));
        assert_eq!(backend.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let e = MockEmbedder::new(8);
        let a = e.embed("hello", "m").await.unwrap();
        let b = e.embed("hello", "m").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(MockEmbedder::failing().embed("x", "m").await.is_err());
    }
}
