//! 后端适配器：按有效配置路由到本地或远程后端
//!
//! - 本地后端不支持工具：附带工具时告警并去掉工具再发送
//! - 远程后端因工具用法被拒（400 / 422）时，去掉工具重试且仅重试一次

use std::sync::Arc;

use serde_json::Value;

use crate::config::LlmSection;
use crate::llm::{
    AssistantTurn, BackendSelection, ChatBackend, ChatMessage, ChatRequest, EngineKind, LlmError,
    LocalChatBackend, RemoteChatBackend,
};

/// 持有两类后端，按 BackendSelection.engine 分发
#[derive(Clone)]
pub struct ChatBackendAdapter {
    local: Arc<dyn ChatBackend>,
    remote: Arc<dyn ChatBackend>,
}

impl ChatBackendAdapter {
    pub fn new(local: Arc<dyn ChatBackend>, remote: Arc<dyn ChatBackend>) -> Self {
        Self { local, remote }
    }

    /// 从 [llm] 配置构造真实的 HTTP 后端
    pub fn from_config(cfg: &LlmSection) -> Self {
        Self::new(
            Arc::new(LocalChatBackend::new(&cfg.local.base_url)),
            Arc::new(RemoteChatBackend::from_env(
                &cfg.remote.base_url,
                &cfg.remote.api_key_env,
            )),
        )
    }

    /// 发送一次对话请求；tools 为空表示纯文本请求
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        selection: &BackendSelection,
        tools: &[Value],
    ) -> Result<AssistantTurn, LlmError> {
        let mut request = ChatRequest {
            model: selection.model.clone(),
            messages: messages.to_vec(),
            options: selection.options.clone(),
            tools: tools.to_vec(),
        };

        match selection.engine {
            EngineKind::Local => {
                if request.has_tools() {
                    tracing::warn!(
                        model = %selection.model,
                        "local backend does not support tools, sending without tools"
                    );
                    request.tools.clear();
                }
                self.local.chat(&request).await
            }
            EngineKind::Remote => match self.remote.chat(&request).await {
                Err(e) if request.has_tools() && e.is_request_rejection() => {
                    tracing::warn!(
                        model = %selection.model,
                        error = %e,
                        "remote backend rejected tool usage, retrying without tools"
                    );
                    request.tools.clear();
                    self.remote.chat(&request).await
                }
                other => other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedBackend;
    use serde_json::{json, Map};

    fn selection(engine: EngineKind) -> BackendSelection {
        BackendSelection {
            engine,
            model: "m".into(),
            options: Map::new(),
        }
    }

    fn tool_schema() -> Vec<Value> {
        vec![json!({"type": "function", "function": {"name": "calculator"}})]
    }

    fn rejection() -> LlmError {
        LlmError::Api {
            status: 400,
            body: "tools not supported".into(),
        }
    }

    #[tokio::test]
    async fn test_local_strips_tools() {
        let local = Arc::new(ScriptedBackend::with_default(AssistantTurn::Text("ok".into())));
        let remote = Arc::new(ScriptedBackend::new());
        let adapter = ChatBackendAdapter::new(local.clone(), remote.clone());

        let turn = adapter
            .complete(&[ChatMessage::user("q")], &selection(EngineKind::Local), &tool_schema())
            .await
            .unwrap();
        assert_eq!(turn, AssistantTurn::Text("ok".into()));

        let requests = local.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].has_tools());
        assert!(remote.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_retries_without_tools_once() {
        let remote = Arc::new(ScriptedBackend::new());
        remote.push(Err(rejection())).await;
        remote.push(Ok(AssistantTurn::Text("plain".into()))).await;
        let adapter = ChatBackendAdapter::new(Arc::new(ScriptedBackend::new()), remote.clone());

        let turn = adapter
            .complete(&[ChatMessage::user("q")], &selection(EngineKind::Remote), &tool_schema())
            .await
            .unwrap();
        assert_eq!(turn, AssistantTurn::Text("plain".into()));

        let requests = remote.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[0].has_tools());
        assert!(!requests[1].has_tools());
    }

    #[tokio::test]
    async fn test_remote_second_rejection_propagates() {
        let remote = Arc::new(ScriptedBackend::new());
        remote.push(Err(rejection())).await;
        remote.push(Err(rejection())).await;
        remote.push(Ok(AssistantTurn::Text("never".into()))).await;
        let adapter = ChatBackendAdapter::new(Arc::new(ScriptedBackend::new()), remote.clone());

        let result = adapter
            .complete(&[ChatMessage::user("q")], &selection(EngineKind::Remote), &tool_schema())
            .await;
        assert!(result.is_err());
        assert_eq!(remote.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remote_other_errors_not_retried() {
        let remote = Arc::new(ScriptedBackend::new());
        remote
            .push(Err(LlmError::Api {
                status: 500,
                body: "boom".into(),
            }))
            .await;
        let adapter = ChatBackendAdapter::new(Arc::new(ScriptedBackend::new()), remote.clone());

        let result = adapter
            .complete(&[ChatMessage::user("q")], &selection(EngineKind::Remote), &tool_schema())
            .await;
        assert!(matches!(result, Err(LlmError::Api { status: 500, .. })));
        assert_eq!(remote.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_without_tools_not_retried() {
        let remote = Arc::new(ScriptedBackend::new());
        remote.push(Err(rejection())).await;
        let adapter = ChatBackendAdapter::new(Arc::new(ScriptedBackend::new()), remote.clone());

        let result = adapter
            .complete(&[ChatMessage::user("q")], &selection(EngineKind::Remote), &[])
            .await;
        assert!(result.is_err());
        assert_eq!(remote.requests().await.len(), 1);
    }
}
