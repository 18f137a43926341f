//! 持久化抽象：对话历史（按 avatar / 渠道 / 会话划分，仅追加）与知识库向量块（只写一次，按距离检索）
//!
//! InMemoryStore 用于测试与未配置数据库的场景；SqliteStore 见 sqlite.rs。

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::integrations::ChannelKind;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 向量维度与存储配置不一致
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 会话定位键
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub avatar_id: String,
    pub channel: ChannelKind,
    pub conversation_id: String,
}

impl ConversationKey {
    pub fn new(
        avatar_id: impl Into<String>,
        channel: ChannelKind,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            avatar_id: avatar_id.into(),
            channel,
            conversation_id: conversation_id.into(),
        }
    }
}

/// 一条对话记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// 知识块（入库前）
#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// 检索命中
#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeHit {
    pub text: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
}

/// Store 能力
#[async_trait]
pub trait Store: Send + Sync {
    /// 配置的向量维度
    fn dimension(&self) -> usize;

    async fn append_history(
        &self,
        key: &ConversationKey,
        sender: &str,
        text: &str,
    ) -> Result<(), StoreError>;

    /// 最近的在前，最多 limit 条
    async fn read_history(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;

    /// 维度不一致时返回 DimensionMismatch，不写入
    async fn append_knowledge(&self, chunk: KnowledgeChunk) -> Result<(), StoreError>;

    /// 最近的在前；threshold 设置时排除距离 >= threshold 的块
    async fn search_knowledge(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<KnowledgeHit>, StoreError>;
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// 欧氏（L2）距离
pub(crate) fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// 计算距离、按阈值过滤、升序排序并截断
pub(crate) fn rank_hits<I>(
    candidates: I,
    query: &[f32],
    limit: usize,
    threshold: Option<f32>,
) -> Vec<KnowledgeHit>
where
    I: IntoIterator<Item = (String, Map<String, Value>, Vec<f32>)>,
{
    let mut hits: Vec<KnowledgeHit> = candidates
        .into_iter()
        .map(|(text, metadata, emb)| KnowledgeHit {
            distance: euclidean_distance(query, &emb),
            text,
            metadata,
        })
        .filter(|h| threshold.map_or(true, |t| h.distance < t))
        .collect();
    hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[derive(Default)]
struct InMemoryState {
    history: Vec<(ConversationKey, ConversationTurn)>,
    knowledge: Vec<KnowledgeChunk>,
}

/// 进程内存储
pub struct InMemoryStore {
    dimension: usize,
    state: RwLock<InMemoryState>,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(InMemoryState::default()),
        }
    }

    pub async fn knowledge_len(&self) -> usize {
        self.state.read().await.knowledge.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn append_history(
        &self,
        key: &ConversationKey,
        sender: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        let turn = ConversationTurn {
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.state.write().await.history.push((key.clone(), turn));
        Ok(())
    }

    async fn read_history(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|(k, _)| k == key)
            .take(limit)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn append_knowledge(&self, chunk: KnowledgeChunk) -> Result<(), StoreError> {
        check_dimension(self.dimension, chunk.embedding.len())?;
        self.state.write().await.knowledge.push(chunk);
        Ok(())
    }

    async fn search_knowledge(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<KnowledgeHit>, StoreError> {
        check_dimension(self.dimension, embedding.len())?;
        let state = self.state.read().await;
        let candidates = state
            .knowledge
            .iter()
            .map(|c| (c.content.clone(), c.metadata.clone(), c.embedding.clone()));
        Ok(rank_hits(candidates, embedding, limit, threshold))
    }
}
