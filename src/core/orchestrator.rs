//! 编排器：按渠道巡检所有 avatar
//!
//! 一次巡检：按 id 顺序逐个 avatar 处理（一个 avatar 的消息全部处理完再到下一个）；
//! 闸门 → 拉取 → 过滤（可选）→ 读历史 → 生成 → 发送 → 写历史 → 发布事件。
//! 单条消息或单个 avatar 的失败只记日志，不会中断整次巡检。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{AppConfig, ChannelSection, ChannelsSection};
use crate::core::{is_active, load_profiles, AvatarError, AvatarProfile, EventBus, InternalMessage, SubscriptionKey};
use crate::generation::{PromptContext, PromptTemplates, ReplyFilter, ResponseGenerator, ToolCallLoop, RAG_QUERY_KEY};
use crate::integrations::{ChannelKind, Connector, ConnectorError, InboundItem, TelegramConnector};
use crate::llm::{ChatBackendAdapter, OpenAiEmbedder};
use crate::memory::{open_store, ContextRetriever, ConversationKey, ConversationTurn, Store};
use crate::tools::builtin_executor;

/// 忽略事件中正文预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 一次巡检的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub channel: Option<ChannelKind>,
    /// 通过闸门且有连接器的 avatar 数
    pub avatars_checked: usize,
    /// 被日程闸门拦下的 avatar 数
    pub avatars_inactive: usize,
    pub fetched: usize,
    pub replied: usize,
    pub ignored: usize,
    pub failed: usize,
}

enum ItemOutcome {
    Replied,
    Ignored,
    SendFailed,
}

/// 编排器
pub struct Orchestrator {
    profiles: BTreeMap<String, AvatarProfile>,
    connectors: HashMap<(String, ChannelKind), Arc<dyn Connector>>,
    generator: ResponseGenerator,
    filter: ReplyFilter,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    channels: ChannelsSection,
    default_history_limit: usize,
}

impl Orchestrator {
    pub fn new(
        profiles: Vec<AvatarProfile>,
        generator: ResponseGenerator,
        filter: ReplyFilter,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            connectors: HashMap::new(),
            generator,
            filter,
            store,
            bus,
            channels: ChannelsSection::default(),
            default_history_limit: 10,
        }
    }

    pub fn with_channels(mut self, channels: ChannelsSection) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_default_history_limit(mut self, limit: usize) -> Self {
        self.default_history_limit = limit;
        self
    }

    /// 为 avatar 注册一个连接器（同一渠道后注册的覆盖先注册的）
    pub fn with_connector(mut self, avatar_id: &str, connector: Arc<dyn Connector>) -> Self {
        self.connectors
            .insert((avatar_id.to_string(), connector.channel()), connector);
        self
    }

    /// 按配置组装全部组件；缺少凭据的连接器只记日志并跳过
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AvatarError> {
        let profiles = load_profiles(&cfg.app.profiles_dir)?;
        let store = open_store(&cfg.database).await;
        let adapter = ChatBackendAdapter::from_config(&cfg.llm);
        let executor = builtin_executor(&cfg.tools)?;
        let retriever = ContextRetriever::new(
            Arc::new(OpenAiEmbedder::from_config(&cfg.embeddings)),
            Arc::clone(&store),
            cfg.embeddings.model.clone(),
        );
        let generator = ResponseGenerator::new(
            ToolCallLoop::new(adapter.clone(), executor),
            retriever,
            PromptTemplates::with_dir(&cfg.app.prompts_dir),
            &cfg.llm,
            &cfg.rag,
        );
        let filter = ReplyFilter::new(adapter, &cfg.llm);

        let mut orchestrator = Self::new(profiles, generator, filter, store, EventBus::start())
            .with_channels(cfg.channels.clone())
            .with_default_history_limit(cfg.avatar.default_history_limit);

        let ids: Vec<String> = orchestrator.profiles.keys().cloned().collect();
        for id in ids {
            match TelegramConnector::from_env(&id) {
                Ok(connector) => {
                    orchestrator = orchestrator.with_connector(&id, Arc::new(connector));
                }
                Err(ConnectorError::MissingCredential(var)) => {
                    tracing::warn!(avatar = %id, credential = %var, "telegram disabled for avatar");
                }
                Err(e) => tracing::error!(avatar = %id, error = %e, "telegram connector unavailable"),
            }
        }
        Ok(orchestrator)
    }

    /// 已加载的 profile（只读，按 id 排序）
    pub fn profiles(&self) -> Vec<&AvatarProfile> {
        self.profiles.values().collect()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn channel_settings(&self, channel: ChannelKind) -> ChannelSection {
        self.channels.get(channel)
    }

    /// 每个 avatar 订阅发给自己的消息并记录日志
    pub async fn subscribe_avatars(&self) {
        for id in self.profiles.keys() {
            let avatar = id.clone();
            self.bus
                .subscribe_fn(SubscriptionKey::Recipient(id.clone()), move |message| {
                    tracing::info!(
                        avatar = %avatar,
                        from = %message.sender,
                        message_type = %message.message_type,
                        "received internal message"
                    );
                    Ok(())
                })
                .await;
        }
    }

    /// 手动触发：依次巡检每个渠道
    pub async fn trigger_all(&self) -> Vec<SweepReport> {
        let mut reports = Vec::with_capacity(ChannelKind::ALL.len());
        for channel in ChannelKind::ALL {
            reports.push(self.sweep(channel).await);
        }
        reports
    }

    /// 巡检一个渠道
    pub async fn sweep(&self, channel: ChannelKind) -> SweepReport {
        let settings = self.channels.get(channel);
        let mut report = SweepReport {
            channel: Some(channel),
            ..SweepReport::default()
        };

        for profile in self.profiles.values() {
            if !is_active(profile, &settings.categories) {
                tracing::debug!(avatar = %profile.id, channel = %channel, "avatar inactive, skipping");
                report.avatars_inactive += 1;
                continue;
            }
            let Some(connector) = self.connectors.get(&(profile.id.clone(), channel)) else {
                continue;
            };
            report.avatars_checked += 1;

            let items = match connector.fetch_updates().await {
                Ok(items) => items,
                Err(e) => {
                    tracing::error!(avatar = %profile.id, channel = %channel, error = %e, "fetch failed");
                    report.failed += 1;
                    continue;
                }
            };
            report.fetched += items.len();

            for item in &items {
                match self
                    .handle_item(profile, connector.as_ref(), &settings, item)
                    .await
                {
                    Ok(ItemOutcome::Replied) => report.replied += 1,
                    Ok(ItemOutcome::Ignored) => report.ignored += 1,
                    Ok(ItemOutcome::SendFailed) => report.failed += 1,
                    Err(e) => {
                        tracing::error!(avatar = %profile.id, channel = %channel, item = %item.id, error = %e, "item processing failed");
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            channel = %channel,
            checked = report.avatars_checked,
            fetched = report.fetched,
            replied = report.replied,
            ignored = report.ignored,
            failed = report.failed,
            "sweep finished"
        );
        report
    }

    async fn handle_item(
        &self,
        profile: &AvatarProfile,
        connector: &dyn Connector,
        settings: &ChannelSection,
        item: &InboundItem,
    ) -> Result<ItemOutcome, AvatarError> {
        let channel = connector.channel();

        if settings.filter_replies && !self.filter.should_reply(item).await {
            tracing::info!(avatar = %profile.id, channel = %channel, from = %item.sender, "message ignored by filter");
            self.bus.publish(
                InternalMessage::new(&profile.id, format!("{}_ignored", channel))
                    .with_field("from", item.sender.clone())
                    .with_field("subject", item.subject.clone().unwrap_or_default())
                    .with_field("body_preview", preview(&item.text)),
            );
            return Ok(ItemOutcome::Ignored);
        }

        let key = ConversationKey::new(&profile.id, channel, &item.conversation_id);
        let limit = profile.history_limit(channel, self.default_history_limit);
        let history = match self.store.read_history(&key, limit).await {
            Ok(turns) => format_history(&turns),
            Err(e) => {
                tracing::warn!(avatar = %profile.id, error = %e, "history unavailable, continuing without it");
                String::new()
            }
        };

        let context = build_context(profile, channel, item, history);
        let reply = self
            .generator
            .generate(profile, context, &settings.template)
            .await?;

        if !connector.send_message(&item.destination, &reply).await {
            tracing::error!(avatar = %profile.id, channel = %channel, destination = %item.destination, "send failed");
            return Ok(ItemOutcome::SendFailed);
        }

        for (sender, text) in [(item.sender.as_str(), item.text.as_str()), (profile.name.as_str(), reply.as_str())] {
            if let Err(e) = self.store.append_history(&key, sender, text).await {
                tracing::warn!(avatar = %profile.id, error = %e, "failed to persist history");
            }
        }

        self.bus.publish(
            InternalMessage::new(&profile.id, format!("{}_replied", channel))
                .with_field("to", item.sender.clone())
                .with_field("conversation_id", item.conversation_id.clone()),
        );
        tracing::info!(avatar = %profile.id, channel = %channel, to = %item.sender, "reply sent");
        Ok(ItemOutcome::Replied)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// "sender: text" 每行一条，时间正序
fn format_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .rev()
        .map(|t| format!("{}: {}", t.sender, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 按渠道构造模板上下文
fn build_context(profile: &AvatarProfile, channel: ChannelKind, item: &InboundItem, history: String) -> PromptContext {
    let mut ctx = PromptContext::new();
    ctx.insert("avatar_name".into(), profile.name.clone());
    ctx.insert("personality".into(), profile.personality.clone());
    ctx.insert("conversation_history".into(), history);
    let subject = item.subject.clone().unwrap_or_default();
    match channel {
        ChannelKind::Email => {
            ctx.insert("email_from".into(), item.sender.clone());
            ctx.insert("email_subject".into(), subject);
            ctx.insert("email_body".into(), item.text.clone());
        }
        ChannelKind::Github => {
            ctx.insert("username".into(), item.sender.clone());
            ctx.insert("thread_title".into(), subject);
            ctx.insert("thread_body".into(), item.text.clone());
        }
        ChannelKind::Telegram => {
            ctx.insert("username".into(), item.sender.clone());
            ctx.insert("message_text".into(), item.text.clone());
        }
        ChannelKind::Discord => {
            ctx.insert("username".into(), item.sender.clone());
            ctx.insert("channel_id".into(), item.destination.clone());
            ctx.insert("message_text".into(), item.text.clone());
        }
    }
    ctx.insert(RAG_QUERY_KEY.into(), item.text.clone());
    ctx
}
