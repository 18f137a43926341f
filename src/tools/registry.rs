//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），启动时显式注册到 ToolRegistry。
//! 工具名全局唯一：重复注册立即失败，不会静默覆盖。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// 工具层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（即 function.name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 判断何时调用）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；成功返回结果文本，失败返回错误描述
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具已存在时返回 DuplicateTool
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 已注册工具名（排序后返回）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 单个工具的 OpenAI function 定义
    pub fn definition(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema(),
                }
            })
        })
    }

    /// 按 allowlist 顺序生成工具定义；未注册的名称告警后跳过
    pub fn definitions_for(&self, allowlist: &[String]) -> Vec<Value> {
        allowlist
            .iter()
            .filter_map(|name| {
                let def = self.definition(name);
                if def.is_none() {
                    tracing::warn!(tool = %name, "allowlisted tool is not registered, skipping");
                }
                def
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("a")).unwrap();
        assert_eq!(
            registry.register(Named("a")),
            Err(ToolError::DuplicateTool("a".into()))
        );
        assert_eq!(registry.tool_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_definitions_follow_allowlist() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("a")).unwrap();
        registry.register(Named("b")).unwrap();
        let defs = registry.definitions_for(&["b".into(), "missing".into(), "a".into()]);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0]["function"]["name"], "b");
        assert_eq!(defs[1]["function"]["name"], "a");
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["parameters"]["type"], "object");
    }
}
