//! Telegram Bot API 连接器（轮询 getUpdates）
//!
//! 每次拉取后把 offset 推进到最后一个 update_id + 1，Telegram 随即丢弃已确认的更新：
//! 同一消息至多投递一次（处理中途崩溃的消息不会重投）。

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::integrations::{avatar_credential, ChannelKind, Connector, ConnectorError, InboundItem};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
    #[serde(default)]
    first_name: String,
}

/// Telegram 连接器
pub struct TelegramConnector {
    client: Client,
    base_url: String,
    avatar_id: String,
    token: String,
    /// 下一次 getUpdates 的 offset
    offset: AtomicI64,
}

impl TelegramConnector {
    pub fn new(avatar_id: &str, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: API_BASE.to_string(),
            avatar_id: avatar_id.to_string(),
            token: token.into(),
            offset: AtomicI64::new(0),
        }
    }

    /// 从 `<AVATAR>_TELEGRAM_TOKEN` 读取 token
    pub fn from_env(avatar_id: &str) -> Result<Self, ConnectorError> {
        Ok(Self::new(avatar_id, avatar_credential(avatar_id, "TELEGRAM_TOKEN")?))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// 只保留文本消息，并返回新的 offset
    fn collect_items(updates: Vec<Update>) -> (Vec<InboundItem>, Option<i64>) {
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        let items = updates
            .into_iter()
            .filter_map(|u| {
                let message = u.message?;
                let text = message.text?;
                let sender = message
                    .from
                    .map(|f| f.username.unwrap_or(if f.first_name.is_empty() { f.id.to_string() } else { f.first_name }))
                    .unwrap_or_else(|| "unknown".to_string());
                Some(InboundItem {
                    id: format!("{}:{}", message.chat.id, message.message_id),
                    sender,
                    conversation_id: message.chat.id.to_string(),
                    destination: message.chat.id.to_string(),
                    subject: None,
                    text,
                })
            })
            .collect();
        (items, next_offset)
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn fetch_updates(&self) -> Result<Vec<InboundItem>, ConnectorError> {
        let offset = self.offset.load(Ordering::SeqCst);
        let resp: ApiResponse<Vec<Update>> = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&json!({ "offset": offset, "limit": 10, "timeout": 0 }))
            .send()
            .await?
            .json()
            .await?;
        if !resp.ok {
            return Err(ConnectorError::Api(resp.description.unwrap_or_default()));
        }

        let (items, next_offset) = Self::collect_items(resp.result.unwrap_or_default());
        if let Some(next) = next_offset {
            self.offset.store(next, Ordering::SeqCst);
        }
        tracing::debug!(avatar = %self.avatar_id, count = items.len(), "telegram updates fetched");
        Ok(items)
    }

    async fn send_message(&self, destination: &str, text: &str) -> bool {
        let result = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": destination, "text": text }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(avatar = %self.avatar_id, chat_id = %destination, "telegram message sent");
                true
            }
            Ok(resp) => {
                tracing::error!(avatar = %self.avatar_id, status = %resp.status(), "telegram send failed");
                false
            }
            Err(e) => {
                tracing::error!(avatar = %self.avatar_id, error = %e, "telegram send failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_items_filters_and_advances_offset() {
        let raw = r#"[
            {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 555}, "from": {"id": 7, "username": "bob", "first_name": "Bob"}, "text": "hi"}},
            {"update_id": 11, "message": {"message_id": 2, "chat": {"id": 555}, "from": {"id": 7, "first_name": "Bob"}}},
            {"update_id": 12}
        ]"#;
        let updates: Vec<Update> = serde_json::from_str(raw).unwrap();
        let (items, next) = TelegramConnector::collect_items(updates);
        assert_eq!(next, Some(13));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sender, "bob");
        assert_eq!(items[0].destination, "555");
        assert_eq!(items[0].text, "hi");
    }

    #[test]
    fn test_method_url() {
        let c = TelegramConnector::new("alice", "TOKEN").with_base_url("http://localhost:9/");
        assert_eq!(c.method_url("getUpdates"), "http://localhost:9/botTOKEN/getUpdates");
    }
}
