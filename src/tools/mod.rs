//! 工具层：注册表、参数 schema 校验、执行器与内置工具

pub mod calculator;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod web_fetch;
pub mod web_search;
pub mod wikipedia;

use std::sync::Arc;

use crate::config::ToolsSection;

pub use calculator::CalculatorTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolError, ToolRegistry};
pub use schema::{parameters_schema_for, validate_args};
pub use web_fetch::WebFetchTool;
pub use web_search::WebSearchTool;
pub use wikipedia::WikipediaTool;

/// 启动时显式注册全部内置工具
pub fn builtin_registry(cfg: &ToolsSection) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool)?;
    registry.register(WebFetchTool::new(cfg.request_timeout_secs, cfg.max_page_chars))?;
    registry.register(WebSearchTool::from_config(cfg))?;
    registry.register(WikipediaTool::new(cfg.request_timeout_secs, cfg.max_summary_chars))?;
    Ok(registry)
}

/// 内置工具执行器
pub fn builtin_executor(cfg: &ToolsSection) -> Result<ToolExecutor, ToolError> {
    Ok(ToolExecutor::new(Arc::new(builtin_registry(cfg)?)))
}
