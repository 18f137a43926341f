//! 回复生成：人格 + 历史 + 检索上下文 + 模板 → 工具循环 → 文本
//!
//! 后端失败只返回固定的兜底回复，不向上传播；模板缺字段属于程序错误，直接返回 Err。

use serde_json::{Map, Value};

use crate::config::{LlmSection, RagSection};
use crate::core::{AvatarError, AvatarProfile};
use crate::generation::{PromptContext, PromptTemplates, ToolCallLoop};
use crate::llm::{BackendSelection, ChatMessage, EngineKind};
use crate::memory::ContextRetriever;

/// 后端不可用时的固定回复
pub const FALLBACK_REPLY: &str = "I'm sorry, but I'm currently unable to process your request.";

/// 上下文中声明检索查询的键
pub const RAG_QUERY_KEY: &str = "rag_query";
/// 模板中检索结果的占位字段
pub const RAG_CONTEXT_KEY: &str = "rag_context";

/// 把检索到的块格式化为 rag_context；无结果时为空串
pub fn format_rag_context(chunks: &[String]) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    format!(
        "\n\nRelevant information from knowledge base:\n{}\n",
        chunks.join("\n---\n")
    )
}

/// 回复生成器
#[derive(Clone)]
pub struct ResponseGenerator {
    tool_loop: ToolCallLoop,
    retriever: ContextRetriever,
    templates: PromptTemplates,
    default_engine: EngineKind,
    default_model: String,
    default_options: Map<String, Value>,
    rag_limit: usize,
    rag_threshold: Option<f32>,
}

impl ResponseGenerator {
    pub fn new(
        tool_loop: ToolCallLoop,
        retriever: ContextRetriever,
        templates: PromptTemplates,
        llm: &LlmSection,
        rag: &RagSection,
    ) -> Self {
        Self {
            tool_loop,
            retriever,
            templates,
            default_engine: llm.engine,
            default_model: llm.model.clone(),
            default_options: llm.options.clone(),
            rag_limit: rag.limit,
            rag_threshold: rag.distance_threshold,
        }
    }

    /// 逐字段合并：profile 有则用 profile，否则用进程默认值
    pub fn effective_backend(&self, profile: &AvatarProfile) -> BackendSelection {
        BackendSelection {
            engine: profile.llm.engine.unwrap_or(self.default_engine),
            model: profile
                .llm
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            options: profile
                .llm
                .options
                .clone()
                .unwrap_or_else(|| self.default_options.clone()),
        }
    }

    /// 生成回复
    pub async fn generate(
        &self,
        profile: &AvatarProfile,
        mut context: PromptContext,
        template: &str,
    ) -> Result<String, AvatarError> {
        let rag_context = match context.get(RAG_QUERY_KEY) {
            Some(query) => {
                let chunks = self
                    .retriever
                    .retrieve(query, self.rag_limit, self.rag_threshold)
                    .await;
                format_rag_context(&chunks)
            }
            None => String::new(),
        };
        context.insert(RAG_CONTEXT_KEY.to_string(), rag_context);

        let prompt = self.templates.render(template, &context)?;
        let selection = self.effective_backend(profile);

        match self
            .tool_loop
            .run(vec![ChatMessage::user(prompt)], &selection, &profile.tools)
            .await
        {
            Ok(outcome) if !outcome.text.trim().is_empty() => {
                tracing::debug!(
                    avatar = %profile.id,
                    round_trips = outcome.round_trips,
                    "response generated"
                );
                Ok(outcome.text)
            }
            Ok(_) => {
                tracing::warn!(avatar = %profile.id, "backend returned empty text, using fallback reply");
                Ok(FALLBACK_REPLY.to_string())
            }
            Err(e) => {
                tracing::error!(avatar = %profile.id, model = %selection.model, error = %e, "generation failed, using fallback reply");
                Ok(FALLBACK_REPLY.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LlmOverride;
    use crate::llm::{AssistantTurn, ChatBackendAdapter, Embedder, LlmError, MockEmbedder, ScriptedBackend};
    use crate::memory::{InMemoryStore, KnowledgeChunk, Store};
    use crate::tools::{ToolExecutor, ToolRegistry};
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn profile(llm: LlmOverride) -> AvatarProfile {
        AvatarProfile {
            id: "alice".into(),
            name: "Alice".into(),
            personality: "Kind.".into(),
            llm,
            tools: Vec::new(),
            history_limits: HashMap::new(),
            schedule: BTreeMap::new(),
        }
    }

    fn context() -> PromptContext {
        [
            ("avatar_name", "Alice"),
            ("personality", "Kind."),
            ("conversation_history", ""),
            ("username", "bob"),
            ("message_text", "what is rust?"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    struct Fixture {
        generator: ResponseGenerator,
        local: Arc<ScriptedBackend>,
        store: Arc<InMemoryStore>,
    }

    fn fixture(embedder: MockEmbedder) -> Fixture {
        let local = Arc::new(ScriptedBackend::new());
        let remote = Arc::new(ScriptedBackend::new());
        let adapter = ChatBackendAdapter::new(local.clone(), remote);
        let tool_loop = ToolCallLoop::new(adapter, ToolExecutor::new(Arc::new(ToolRegistry::new())));
        let store = Arc::new(InMemoryStore::new(4));
        let retriever = ContextRetriever::new(Arc::new(embedder), store.clone(), "embed");
        let generator = ResponseGenerator::new(
            tool_loop,
            retriever,
            PromptTemplates::builtin(),
            &LlmSection::default(),
            &RagSection::default(),
        );
        Fixture { generator, local, store }
    }

    #[test]
    fn test_format_rag_context() {
        assert_eq!(format_rag_context(&[]), "");
        assert_eq!(
            format_rag_context(&["a".into(), "b".into()]),
            "\n\nRelevant information from knowledge base:\na\n---\nb\n"
        );
    }

    #[test]
    fn test_effective_backend_merges_per_field() {
        let f = fixture(MockEmbedder::new(4));
        let defaults = f.generator.effective_backend(&profile(LlmOverride::default()));
        assert_eq!(defaults.engine, EngineKind::Local);
        assert_eq!(defaults.model, "llama3:8b");
        assert_eq!(defaults.options["temperature"], json!(0.7));

        let mut options = Map::new();
        options.insert("top_p".into(), json!(0.9));
        let merged = f.generator.effective_backend(&profile(LlmOverride {
            engine: Some(EngineKind::Remote),
            model: None,
            options: Some(options),
        }));
        assert_eq!(merged.engine, EngineKind::Remote);
        assert_eq!(merged.model, "llama3:8b");
        assert!(merged.options.get("temperature").is_none());
        assert_eq!(merged.options["top_p"], json!(0.9));
    }

    #[tokio::test]
    async fn test_generate_injects_rag_context() {
        let f = fixture(MockEmbedder::new(4));
        let embedder = MockEmbedder::new(4);
        let text = "Rust is a systems language.";
        let embedding = embedder.embed(text, "embed").await.unwrap();
        f.store
            .append_knowledge(KnowledgeChunk {
                content: text.into(),
                embedding,
                metadata: Map::new(),
            })
            .await
            .unwrap();
        f.local.push(Ok(AssistantTurn::Text("Rust is great.".into()))).await;

        let mut ctx = context();
        ctx.insert(RAG_QUERY_KEY.into(), text.into());
        let reply = f
            .generator
            .generate(&profile(LlmOverride::default()), ctx, "telegram_message_template.txt")
            .await
            .unwrap();
        assert_eq!(reply, "Rust is great.");

        let requests = f.local.requests().await;
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("Relevant information from knowledge base:"));
        assert!(prompt.contains(text));
    }

    #[tokio::test]
    async fn test_retrieval_failure_does_not_block() {
        let f = fixture(MockEmbedder::failing());
        f.local.push(Ok(AssistantTurn::Text("ok".into()))).await;
        let mut ctx = context();
        ctx.insert(RAG_QUERY_KEY.into(), "anything".into());
        let reply = f
            .generator
            .generate(&profile(LlmOverride::default()), ctx, "telegram_message_template.txt")
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        let prompt = &f.local.requests().await[0].messages[0].content;
        assert!(!prompt.contains("Relevant information"));
    }

    #[tokio::test]
    async fn test_backend_error_yields_fallback() {
        let f = fixture(MockEmbedder::new(4));
        f.local
            .push(Err(LlmError::Transport("connection refused".into())))
            .await;
        let reply = f
            .generator
            .generate(&profile(LlmOverride::default()), context(), "telegram_message_template.txt")
            .await
            .unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_missing_field_is_error() {
        let f = fixture(MockEmbedder::new(4));
        let result = f
            .generator
            .generate(&profile(LlmOverride::default()), context(), "email_reply_template.txt")
            .await;
        assert!(matches!(result, Err(AvatarError::Template(_))));
        assert!(f.local.requests().await.is_empty());
    }
}
