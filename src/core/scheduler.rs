//! 定时巡检：每个启用的渠道一个 tokio 任务，按 interval_minutes 周期调用 Orchestrator::sweep
//!
//! 同一渠道的巡检串行（上一次未结束时跳过错过的 tick）；不同渠道之间互不等待。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::Orchestrator;
use crate::integrations::ChannelKind;

/// 渠道巡检调度器
pub struct ChannelScheduler {
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl ChannelScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消 token：cancel 后所有巡检任务在当前 sweep 结束后退出
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 启用且间隔有效的渠道及其周期
    pub fn schedule(&self) -> Vec<(ChannelKind, Duration)> {
        ChannelKind::ALL
            .into_iter()
            .filter_map(|channel| {
                let settings = self.orchestrator.channel_settings(channel);
                if !settings.enabled {
                    tracing::info!(channel = %channel, "channel disabled");
                    return None;
                }
                if settings.interval_minutes == 0 {
                    tracing::warn!(channel = %channel, "interval_minutes is 0, channel not scheduled");
                    return None;
                }
                Some((channel, Duration::from_secs(settings.interval_minutes * 60)))
            })
            .collect()
    }

    /// 启动全部巡检任务
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.schedule()
            .into_iter()
            .map(|(channel, period)| {
                let orchestrator = Arc::clone(&self.orchestrator);
                let cancel = self.cancel.clone();
                tracing::info!(channel = %channel, every_secs = period.as_secs(), "channel scheduled");
                tokio::spawn(run_channel(orchestrator, channel, period, cancel))
            })
            .collect()
    }

    /// 运行直到 Ctrl+C，然后停止任务并关闭事件总线
    pub async fn run_until_shutdown(self) {
        let handles = self.spawn();
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = cancel.cancelled() => {}
        }
        self.cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "channel task terminated abnormally");
            }
        }
        self.orchestrator.bus().shutdown().await;
        tracing::info!("scheduler stopped");
    }
}

async fn run_channel(
    orchestrator: Arc<Orchestrator>,
    channel: ChannelKind,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                orchestrator.sweep(channel).await;
            }
        }
    }
    tracing::debug!(channel = %channel, "channel task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelOverride, ChannelsSection, LlmSection, RagSection};
    use crate::core::EventBus;
    use crate::generation::{PromptTemplates, ReplyFilter, ResponseGenerator, ToolCallLoop};
    use crate::llm::{ChatBackendAdapter, MockEmbedder, ScriptedBackend};
    use crate::memory::{ContextRetriever, InMemoryStore};
    use crate::tools::{ToolExecutor, ToolRegistry};
    use std::collections::HashMap;

    fn orchestrator(channels: ChannelsSection) -> Arc<Orchestrator> {
        let backend = Arc::new(ScriptedBackend::new());
        let adapter = ChatBackendAdapter::new(backend.clone(), backend);
        let store = Arc::new(InMemoryStore::new(4));
        let generator = ResponseGenerator::new(
            ToolCallLoop::new(adapter.clone(), ToolExecutor::new(Arc::new(ToolRegistry::new()))),
            ContextRetriever::new(Arc::new(MockEmbedder::new(4)), store.clone(), "embed"),
            PromptTemplates::builtin(),
            &LlmSection::default(),
            &RagSection::default(),
        );
        let filter = ReplyFilter::new(adapter, &LlmSection::default());
        Arc::new(
            Orchestrator::new(Vec::new(), generator, filter, store, EventBus::start()).with_channels(channels),
        )
    }

    #[tokio::test]
    async fn test_schedule_skips_disabled_channels() {
        let mut overrides = HashMap::new();
        overrides.insert(
            ChannelKind::Github,
            ChannelOverride {
                enabled: Some(false),
                ..ChannelOverride::default()
            },
        );
        overrides.insert(
            ChannelKind::Discord,
            ChannelOverride {
                interval_minutes: Some(0),
                ..ChannelOverride::default()
            },
        );
        let scheduler = ChannelScheduler::new(orchestrator(ChannelsSection(overrides)));
        let schedule = scheduler.schedule();
        assert_eq!(
            schedule,
            vec![
                (ChannelKind::Email, Duration::from_secs(240)),
                (ChannelKind::Telegram, Duration::from_secs(120)),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_tasks() {
        let scheduler = ChannelScheduler::new(orchestrator(ChannelsSection::default()));
        let handles = scheduler.spawn();
        assert_eq!(handles.len(), 4);
        scheduler.token().cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
