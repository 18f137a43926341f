//! 知识库检索：查询文本 → 嵌入 → 最近邻知识块
//!
//! 失败（嵌入或存储）只记日志并返回空结果，不会阻断生成。

use std::sync::Arc;

use crate::core::AvatarError;
use crate::llm::Embedder;
use crate::memory::Store;

/// 上下文检索器
#[derive(Clone)]
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    model: String,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn Store>, model: impl Into<String>) -> Self {
        Self {
            embedder,
            store,
            model: model.into(),
        }
    }

    /// 返回块文本，最近的在前；查询为空时不发起任何调用
    pub async fn retrieve(&self, query: &str, limit: usize, distance_threshold: Option<f32>) -> Vec<String> {
        if query.trim().is_empty() || limit == 0 {
            return Vec::new();
        }
        match self.try_retrieve(query, limit, distance_threshold).await {
            Ok(chunks) => {
                tracing::debug!(hits = chunks.len(), "knowledge retrieved");
                chunks
            }
            Err(e) => {
                tracing::error!(error = %e, "continuing without knowledge context");
                Vec::new()
            }
        }
    }

    /// 不吞错误的版本
    pub async fn try_retrieve(
        &self,
        query: &str,
        limit: usize,
        distance_threshold: Option<f32>,
    ) -> Result<Vec<String>, AvatarError> {
        let embedding = self
            .embedder
            .embed(query, &self.model)
            .await
            .map_err(|e| AvatarError::Retrieval(format!("embedding failed: {}", e)))?;
        let hits = self
            .store
            .search_knowledge(&embedding, limit, distance_threshold)
            .await
            .map_err(|e| AvatarError::Retrieval(format!("knowledge search failed: {}", e)))?;
        Ok(hits.into_iter().map(|h| h.text).collect())
    }
}
