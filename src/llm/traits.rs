//! LLM 后端抽象
//!
//! 所有对话后端（本地推理 / 远程 HTTP / Mock）实现 ChatBackend：单次无状态请求 → 助手回合。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{AssistantTurn, ChatRequest};

/// 后端与嵌入调用的错误
#[derive(Error, Debug)]
pub enum LlmError {
    /// 服务端返回非 2xx
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    /// 请求校验类客户端错误（400 / 422）：附带工具时视为「不支持或格式错误的工具用法」
    pub fn is_request_rejection(&self) -> bool {
        matches!(self, LlmError::Api { status: 400 | 422, .. })
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}

/// 对话后端 trait
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 发送完整消息列表，返回一个助手回合
    async fn chat(&self, request: &ChatRequest) -> Result<AssistantTurn, LlmError>;
}
