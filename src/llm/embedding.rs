//! 嵌入 API：供知识库检索与入库使用，调用 OpenAI 兼容的 /embeddings 端点

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::EmbeddingsSection;
use crate::llm::LlmError;

/// 文本 → 定长向量
#[async_trait]
pub trait Embedder: Send + Sync {
    /// 用指定模型编码文本；空向量视为失败
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, LlmError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API（Ollama 的 /v1 亦可）
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        // 本地兼容端点不校验 key，但 async-openai 需要一个值
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
        }
    }

    /// 从 [embeddings] 配置创建，API Key 从配置指定的环境变量读取
    pub fn from_config(cfg: &EmbeddingsSection) -> Self {
        Self::new(&cfg.base_url, std::env::var(&cfg.api_key_env).ok())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, LlmError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .unwrap_or_default();
        if vector.is_empty() {
            return Err(LlmError::InvalidResponse("empty embedding".to_string()));
        }
        Ok(vector)
    }
}
