//! 记忆层：对话历史与知识库存储、知识检索、知识入库

pub mod rag;
pub mod retriever;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use crate::config::DatabaseSection;

pub use rag::{Chunk, Chunker, ChunkingConfig, IngestReport, KnowledgeIngestor};
pub use retriever::ContextRetriever;
pub use sqlite::SqliteStore;
pub use store::{
    ConversationKey, ConversationTurn, InMemoryStore, KnowledgeChunk, KnowledgeHit, Store,
    StoreError,
};

/// 按 [database] 配置打开存储；未配置或打开失败时退回内存存储
pub async fn open_store(cfg: &DatabaseSection) -> Arc<dyn Store> {
    match cfg.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => match SqliteStore::connect(url, cfg.vector_dimension).await {
            Ok(store) => {
                tracing::info!(url = %url, "sqlite store opened");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "cannot open database, history will not persist");
                Arc::new(InMemoryStore::new(cfg.vector_dimension))
            }
        },
        None => {
            tracing::info!("no database configured, using in-memory store");
            Arc::new(InMemoryStore::new(cfg.vector_dimension))
        }
    }
}
