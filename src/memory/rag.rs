//! 知识库入库：文档分块 → 嵌入 → 写入 Store
//!
//! 分块按字符窗口（UTF-8 安全），优先在分隔符处断开，相邻块保留重叠。
//! HTML 文件先转为纯文本；单个文件失败只记日志，不中断整个目录。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map};
use walkdir::WalkDir;

use crate::config::RagSection;
use crate::core::AvatarError;
use crate::llm::Embedder;
use crate::memory::{KnowledgeChunk, Store};
use crate::tools::web_fetch::html_to_text;

const DEFAULT_EXTENSIONS: &[&str] = &[".txt", ".md", ".html", ".htm"];

/// 文档块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 在文档中的序号
    pub index: usize,
    pub text: String,
    /// 在原文档中的字符偏移
    pub offset: usize,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                "。".to_string(),
                ". ".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

impl ChunkingConfig {
    pub fn from_rag(rag: &RagSection) -> Self {
        Self {
            chunk_size: rag.chunk_size.max(1),
            chunk_overlap: rag.chunk_overlap,
            ..Self::default()
        }
    }
}

/// 文档分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文档分割为块（UTF-8 安全）
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut current = 0;

        while current < total {
            let target_end = (current + size).min(total);
            let mut end = target_end;

            // 不是文档末尾时，尝试在分隔符处断开
            if target_end < total {
                let window: String = chars[current..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = window.rfind(sep.as_str()) {
                        let to_sep = window[..pos].chars().count() + sep.chars().count();
                        if to_sep > 0 {
                            end = current + to_sep;
                            break;
                        }
                    }
                }
            }
            if end <= current {
                end = (current + 1).min(total);
            }

            let piece: String = chars[current..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(Chunk {
                    index: chunks.len(),
                    text: trimmed.to_string(),
                    offset: current,
                });
            }

            if end >= total {
                break;
            }
            let overlap = self.config.chunk_overlap.min(end - current);
            let next = end.saturating_sub(overlap);
            current = if next > current { next } else { end };
        }

        chunks
    }
}

/// 一次目录入库的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 知识库入库器
pub struct KnowledgeIngestor {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    model: String,
    extensions: Vec<String>,
}

impl KnowledgeIngestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            model: model.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// 只入库这些扩展名（含点，如 ".md"，大小写不敏感）
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()));
        ext.is_some_and(|e| self.extensions.contains(&e))
    }

    fn is_html(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref(),
            Some("html") | Some("htm")
        )
    }

    /// 入库单个文本；返回写入的块数
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<usize, AvatarError> {
        let chunks = self.chunker.chunk(text);
        tracing::info!(source = %source, chunks = chunks.len(), "document chunked");
        for chunk in &chunks {
            let embedding = self.embedder.embed(&chunk.text, &self.model).await?;
            let mut metadata = Map::new();
            metadata.insert("source".to_string(), json!(source));
            metadata.insert("chunk_index".to_string(), json!(chunk.index));
            self.store
                .append_knowledge(KnowledgeChunk {
                    content: chunk.text.clone(),
                    embedding,
                    metadata,
                })
                .await?;
        }
        Ok(chunks.len())
    }

    /// 入库单个文件；空文件返回 Ok(0)
    pub async fn ingest_file(&self, path: &Path, source: &str) -> Result<usize, AvatarError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let content = if Self::is_html(path) {
            html_to_text(&raw)
        } else {
            raw
        };
        if content.trim().is_empty() {
            tracing::warn!(source = %source, "skipping empty file");
            return Ok(0);
        }
        self.ingest_text(source, &content).await
    }

    /// 递归入库目录下所有匹配扩展名的文件（跳过隐藏文件）
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport, AvatarError> {
        if !dir.is_dir() {
            return Err(AvatarError::Config(format!(
                "knowledge base directory not found: {}",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut report = IngestReport::default();
        for path in files {
            if !self.accepts(&path) {
                tracing::debug!(path = %path.display(), "skipping unsupported file");
                report.skipped += 1;
                continue;
            }
            let source = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            match self.ingest_file(&path, &source).await {
                Ok(0) => report.skipped += 1,
                Ok(n) => {
                    report.files += 1;
                    report.chunks += n;
                    tracing::info!(source = %source, chunks = n, "ingested");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(source = %source, error = %e, "failed to ingest file");
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::memory::InMemoryStore;

    fn small_chunker() -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size: 20,
            chunk_overlap: 5,
            ..Default::default()
        })
    }

    #[test]
    fn test_chunking_covers_text_with_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = small_chunker().chunk(text);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= 20);
        }
        assert!(chunks.last().unwrap().text.ends_with("kappa"));
        assert!(chunks[0].text.starts_with("alpha"));
    }

    #[test]
    fn test_chunking_utf8_and_empty() {
        let chunker = small_chunker();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n  ").is_empty());
        let text = "日本語のテキストはスペースがなくても正しく分割されるべきです。とても長い文章です。";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
    }

    #[test]
    fn test_chunking_config_default() {
        let config = ChunkingConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
    }

    #[tokio::test]
    async fn test_ingest_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("faq.md"), "Opening hours are nine to five.").unwrap();
        std::fs::write(
            dir.path().join("page.html"),
            "<html><body><p>Refunds within 30 days.</p></body></html>",
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();
        std::fs::write(dir.path().join("image.png"), "binary").unwrap();
        std::fs::write(dir.path().join(".hidden.md"), "secret").unwrap();

        let store = Arc::new(InMemoryStore::new(8));
        let ingestor = KnowledgeIngestor::new(
            Chunker::default(),
            Arc::new(MockEmbedder::new(8)),
            store.clone(),
            "m",
        );
        let report = ingestor.ingest_dir(dir.path()).await.unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(store.knowledge_len().await, 2);

        let embedding = MockEmbedder::new(8).embed("x", "m").await.unwrap();
        let hits = store.search_knowledge(&embedding, 10, None).await.unwrap();
        assert!(hits.iter().any(|h| h.metadata["source"] == "faq.md"));
        assert!(hits.iter().all(|h| h.metadata["chunk_index"] == 0));
        assert!(hits.iter().all(|h| !h.text.contains("<p>")));
    }

    #[tokio::test]
    async fn test_ingest_failure_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "some text").unwrap();
        let ingestor = KnowledgeIngestor::new(
            Chunker::default(),
            Arc::new(MockEmbedder::failing()),
            Arc::new(InMemoryStore::new(8)),
            "m",
        );
        let report = ingestor.ingest_dir(dir.path()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.files, 0);
    }
}
