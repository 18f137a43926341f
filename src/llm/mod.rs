//! LLM 层：统一消息类型、后端抽象与实现（本地推理 / 远程 OpenAI 兼容 / Mock）、嵌入

pub mod adapter;
pub mod embedding;
pub mod local;
pub mod mock;
pub mod remote;
pub mod traits;
pub mod types;

pub use adapter::ChatBackendAdapter;
pub use embedding::{Embedder, OpenAiEmbedder};
pub use local::LocalChatBackend;
pub use mock::{MockEmbedder, ScriptedBackend};
pub use remote::RemoteChatBackend;
pub use traits::{ChatBackend, LlmError};
pub use types::{
    AssistantTurn, BackendSelection, ChatMessage, ChatRequest, EngineKind, Role, ToolCallRequest,
};
