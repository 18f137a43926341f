//! 回复过滤：单次零温度调用，模型只输出 REPLY 或 IGNORE
//!
//! 后端出错一律按「不回复」处理（fail-closed）。

use serde_json::{Map, Value};

use crate::config::LlmSection;
use crate::integrations::InboundItem;
use crate::llm::{AssistantTurn, BackendSelection, ChatBackendAdapter, ChatMessage, EngineKind};

/// 过滤器
#[derive(Clone)]
pub struct ReplyFilter {
    adapter: ChatBackendAdapter,
    engine: EngineKind,
    model: String,
}

impl ReplyFilter {
    pub fn new(adapter: ChatBackendAdapter, llm: &LlmSection) -> Self {
        Self {
            adapter,
            engine: llm.engine,
            model: llm.filter_model.clone(),
        }
    }

    fn selection(&self) -> BackendSelection {
        let mut options = Map::new();
        options.insert("temperature".to_string(), Value::from(0.0));
        BackendSelection {
            engine: self.engine,
            model: self.model.clone(),
            options,
        }
    }

    /// 判断入站消息是否需要回复
    pub async fn should_reply(&self, item: &InboundItem) -> bool {
        let prompt = filter_prompt(item);
        match self
            .adapter
            .complete(&[ChatMessage::user(prompt)], &self.selection(), &[])
            .await
        {
            Ok(AssistantTurn::Text(decision)) => {
                let decision = decision.trim().to_uppercase();
                tracing::debug!(item = %item.id, decision = %decision, "filter decision");
                decision.contains("REPLY")
            }
            Ok(AssistantTurn::ToolCalls(_)) => {
                tracing::warn!(item = %item.id, "filter got tool calls instead of a decision, not replying");
                false
            }
            Err(e) => {
                tracing::error!(item = %item.id, error = %e, "filter decision failed, not replying");
                false
            }
        }
    }
}

fn filter_prompt(item: &InboundItem) -> String {
    format!(
        "You are a strict message filter. Decide if the following message requires a reply. \
Respond ONLY with the single word 'REPLY' or 'IGNORE'.\n\n\
REPLY to: Direct questions, requests for action, important project updates, or personal messages from known contacts.\n\
IGNORE: Spam, advertisements, automatic notifications, newsletters, or messages that are purely informational and don't need a response.\n\n\
Message to analyze:\n\
From: {}\n\
Subject: {}\n\
Body: {}\n\n\
Your decision:",
        item.sender,
        item.subject.as_deref().unwrap_or(""),
        item.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedBackend};
    use serde_json::json;
    use std::sync::Arc;

    fn item() -> InboundItem {
        InboundItem {
            id: "m1".into(),
            sender: "bob@example.com".into(),
            conversation_id: "bob@example.com".into(),
            destination: "bob@example.com".into(),
            subject: Some("Question".into()),
            text: "Can we meet tomorrow?".into(),
        }
    }

    fn filter() -> (ReplyFilter, Arc<ScriptedBackend>) {
        let local = Arc::new(ScriptedBackend::new());
        let adapter = ChatBackendAdapter::new(local.clone(), Arc::new(ScriptedBackend::new()));
        (ReplyFilter::new(adapter, &LlmSection::default()), local)
    }

    #[tokio::test]
    async fn test_reply_decision() {
        let (filter, backend) = filter();
        backend.push(Ok(AssistantTurn::Text("  reply.\n".into()))).await;
        assert!(filter.should_reply(&item()).await);

        let requests = backend.requests().await;
        assert_eq!(requests[0].options["temperature"], json!(0.0));
        assert!(requests[0].messages[0].content.contains("Subject: Question"));
    }

    #[tokio::test]
    async fn test_ignore_decision() {
        let (filter, backend) = filter();
        backend.push(Ok(AssistantTurn::Text("IGNORE".into()))).await;
        assert!(!filter.should_reply(&item()).await);
    }

    #[tokio::test]
    async fn test_backend_error_is_fail_closed() {
        let (filter, backend) = filter();
        backend.push(Err(LlmError::Transport("down".into()))).await;
        assert!(!filter.should_reply(&item()).await);
    }
}
