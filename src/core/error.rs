//! Avatar 处理错误
//!
//! 分类：配置 / 检索 / 后端 / 工具 / 存储 / 模板 / 渠道连接器 / IO。
//! 除模板错误（程序错误）外，均在 avatar 处理边界内被恢复或记录，不会中断整个巡检。

use thiserror::Error;

use crate::generation::TemplateError;
use crate::integrations::ConnectorError;
use crate::llm::LlmError;
use crate::memory::StoreError;
use crate::tools::ToolError;

/// Avatar 处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AvatarError {
    /// 缺少凭据或字段：只影响对应的连接器
    #[error("Config error: {0}")]
    Config(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
