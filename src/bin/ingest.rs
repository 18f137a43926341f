//! 知识库入库：把目录下的文本 / Markdown / HTML 切块、嵌入并写入存储
//!
//! 用法：avatars-ingest [DIR]，DIR 缺省为 [rag].knowledge_base_dir

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use avatar_crew::config::load_config;
use avatar_crew::llm::OpenAiEmbedder;
use avatar_crew::memory::{open_store, Chunker, ChunkingConfig, KnowledgeIngestor};
use avatar_crew::observability;
use clap::Parser;

#[derive(Parser)]
#[command(name = "avatars-ingest", about = "Load a knowledge base directory into the vector store")]
struct Cli {
    /// 知识库目录
    dir: Option<PathBuf>,

    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load configuration")?;
    observability::init(&cfg.app.log_level);

    let dir = cli.dir.unwrap_or_else(|| cfg.rag.knowledge_base_dir.clone());
    let store = open_store(&cfg.database).await;
    let ingestor = KnowledgeIngestor::new(
        Chunker::new(ChunkingConfig::from_rag(&cfg.rag)),
        Arc::new(OpenAiEmbedder::from_config(&cfg.embeddings)),
        store,
        cfg.embeddings.model.clone(),
    )
    .with_extensions(cfg.rag.ingest_extensions.clone());

    let report = ingestor
        .ingest_dir(&dir)
        .await
        .with_context(|| format!("Failed to ingest {}", dir.display()))?;
    println!(
        "Ingested {} chunks from {} files ({} skipped, {} failed)",
        report.chunks, report.files, report.skipped, report.failed
    );
    Ok(())
}
