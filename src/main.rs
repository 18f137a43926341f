//! Avatar Crew 主程序
//!
//! - run（默认）：按渠道周期巡检，直到 Ctrl+C
//! - trigger：立即把每个渠道巡检一遍后退出
//! - list：列出已加载的 avatar

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use avatar_crew::config::load_config;
use avatar_crew::core::{ChannelScheduler, Orchestrator};
use avatar_crew::observability;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "avatar-crew", about = "Autonomous avatar personas over email, GitHub, Telegram and Discord")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 周期巡检所有启用的渠道
    Run,
    /// 立即巡检所有渠道一次
    Trigger,
    /// 列出已加载的 avatar
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load configuration")?;
    observability::init(&cfg.app.log_level);

    let orchestrator = Orchestrator::from_config(&cfg)
        .await
        .context("Failed to build orchestrator")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::List => {
            for profile in orchestrator.profiles() {
                let tools = if profile.tools.is_empty() {
                    "-".to_string()
                } else {
                    profile.tools.join(", ")
                };
                println!("{}\t{}\ttools: {}", profile.id, profile.name, tools);
            }
            orchestrator.bus().shutdown().await;
        }
        Command::Trigger => {
            orchestrator.subscribe_avatars().await;
            for report in orchestrator.trigger_all().await {
                tracing::info!(?report, "manual sweep");
            }
            orchestrator.bus().shutdown().await;
        }
        Command::Run => {
            orchestrator.subscribe_avatars().await;
            tracing::info!(avatars = orchestrator.profiles().len(), "{} started", cfg.app.name);
            ChannelScheduler::new(Arc::new(orchestrator))
                .run_until_shutdown()
                .await;
        }
    }
    Ok(())
}
