//! SQLite 持久化（sqlx，完全异步）
//!
//! 两张表：conversation_history（对话历史）与 knowledge_chunks（知识块，向量以 JSON 存储）。
//! 检索在进程内计算欧氏距离，升序返回。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::memory::store::{check_dimension, rank_hits};
use crate::memory::{ConversationKey, ConversationTurn, KnowledgeChunk, KnowledgeHit, Store, StoreError};

/// SQLite 存储
pub struct SqliteStore {
    pool: SqlitePool,
    dimension: usize,
}

impl SqliteStore {
    /// 连接数据库并建表；url 形如 `sqlite:avatars.db?mode=rwc` 或 `sqlite::memory:`
    pub async fn connect(url: &str, dimension: usize) -> Result<Self, StoreError> {
        // 内存库每个连接各自独立，只能用单连接
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool, dimension };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversation_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                avatar_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_conversation
             ON conversation_history(avatar_id, channel, conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn append_history(
        &self,
        key: &ConversationKey,
        sender: &str,
        text: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_history
             (avatar_id, channel, conversation_id, sender, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.avatar_id)
        .bind(key.channel.as_str())
        .bind(&key.conversation_id)
        .bind(sender)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_history(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = sqlx::query(
            "SELECT sender, message, created_at FROM conversation_history
             WHERE avatar_id = ? AND channel = ? AND conversation_id = ?
             ORDER BY id DESC LIMIT ?",
        )
        .bind(&key.avatar_id)
        .bind(key.channel.as_str())
        .bind(&key.conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                ConversationTurn {
                    sender: row.get("sender"),
                    text: row.get("message"),
                    timestamp: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn append_knowledge(&self, chunk: KnowledgeChunk) -> Result<(), StoreError> {
        check_dimension(self.dimension, chunk.embedding.len())?;
        sqlx::query(
            "INSERT INTO knowledge_chunks (content, embedding, metadata, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk.content)
        .bind(serde_json::to_string(&chunk.embedding)?)
        .bind(serde_json::to_string(&chunk.metadata)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_knowledge(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<KnowledgeHit>, StoreError> {
        check_dimension(self.dimension, embedding.len())?;
        let rows = sqlx::query("SELECT content, embedding, metadata FROM knowledge_chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_embedding: String = row.get("embedding");
            let raw_metadata: String = row.get("metadata");
            let vector: Vec<f32> = serde_json::from_str(&raw_embedding)?;
            if vector.len() != self.dimension {
                tracing::warn!(
                    expected = self.dimension,
                    actual = vector.len(),
                    "skipping knowledge chunk with foreign dimension"
                );
                continue;
            }
            let metadata: Map<String, Value> = serde_json::from_str(&raw_metadata)?;
            candidates.push((row.get::<String, _>("content"), metadata, vector));
        }
        Ok(rank_hits(candidates, embedding, limit, threshold))
    }
}
