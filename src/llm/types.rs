//! 对话消息与后端选择
//!
//! 与具体后端无关的统一表示：消息（含工具调用回合与工具结果回合）、助手回合、单次请求与有效后端配置。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 后端类别：本地推理（不支持工具）与远程 HTTP 对话补全（支持工具）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Local,
    Remote,
}

/// 消息角色（与 OpenAI 兼容 API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 模型请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 调用 ID，工具结果回合按此关联
    pub id: String,
    pub name: String,
    /// 参数；模型给出的参数无法解析为 JSON 时保留原始字符串
    pub arguments: Value,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// 仅 Assistant 的工具调用回合非空
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 Tool 回合：对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// 助手的工具调用回合
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// 工具结果回合（按调用 ID 标记）
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// 助手回合：要么是文本，要么是工具调用请求
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantTurn {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// 有效后端配置：profile 覆盖与进程默认值逐字段合并后的结果
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSelection {
    pub engine: EngineKind,
    pub model: String,
    pub options: Map<String, Value>,
}

/// 发往具体后端的一次请求；后端无状态，每次都携带完整历史
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: Map<String, Value>,
    /// OpenAI function 格式的工具 schema；为空表示不附带工具
    pub tools: Vec<Value>,
}

impl ChatRequest {
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }
}
