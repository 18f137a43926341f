//! 渠道集成：渠道种类、连接器抽象与凭据解析
//!
//! 每个 avatar 每个渠道一个 Connector：fetch_updates 拉取新消息，send_message 发送回复。
//! 凭据从环境变量 `<AVATAR_ID 大写，- 换成 _>_<NAME>` 读取，缺失只影响该连接器。

pub mod telegram;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use telegram::TelegramConnector;

/// 渠道种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Github,
    Telegram,
    Discord,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Email,
        ChannelKind::Github,
        ChannelKind::Telegram,
        ChannelKind::Discord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Github => "github",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
        }
    }

    /// 该渠道默认使用的提示词模板
    pub fn default_template(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email_reply_template.txt",
            ChannelKind::Github => "github_comment_template.txt",
            ChannelKind::Telegram => "telegram_message_template.txt",
            ChannelKind::Discord => "discord_message_template.txt",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接器错误
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// 缺少凭据（环境变量）
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),
}

/// 一条入站消息（各渠道统一形状）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundItem {
    /// 渠道内的消息 ID
    pub id: String,
    /// 发送者标识（邮箱地址、用户名等）
    pub sender: String,
    /// 会话 ID（历史记录按此划分）
    pub conversation_id: String,
    /// 回复发往的目标（chat_id、issue 号等）
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub text: String,
}

/// 渠道连接器
#[async_trait]
pub trait Connector: Send + Sync {
    fn channel(&self) -> ChannelKind;

    /// 拉取新的入站消息（按到达顺序）；已处理过的消息不应再次返回
    async fn fetch_updates(&self) -> Result<Vec<InboundItem>, ConnectorError>;

    /// 发送消息，返回是否成功
    async fn send_message(&self, destination: &str, text: &str) -> bool;
}

/// avatar 专属环境变量名：`alice-bot` + `TELEGRAM_TOKEN` → `ALICE_BOT_TELEGRAM_TOKEN`
pub fn avatar_env_var(avatar_id: &str, name: &str) -> String {
    format!("{}_{}", avatar_id.to_uppercase().replace('-', "_"), name)
}

/// 读取 avatar 凭据；缺失或为空时返回 MissingCredential
pub fn avatar_credential(avatar_id: &str, name: &str) -> Result<String, ConnectorError> {
    let var = avatar_env_var(avatar_id, name);
    match std::env::var(&var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConnectorError::MissingCredential(var)),
    }
}
