//! 工具执行器
//!
//! 持有 ToolRegistry，execute(tool_name, args) 依次做：查找 → 按 schema 校验参数 → 调用（捕获 panic）。
//! 任何失败都转为 ToolError，不向上抛出 panic；每次调用输出结构化审计日志（JSON）。
//! 本层不施加超时。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;

use crate::tools::schema::validate_args;
use crate::tools::{ToolError, ToolRegistry};

/// 工具执行器：共享只读注册表
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；未知工具 / 参数不合法 / 工具失败或 panic 均返回 ToolError
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = self.run(tool_name, args).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::UnknownTool(_)) => "unknown_tool",
            Err(ToolError::InvalidArguments { .. }) => "invalid_args",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn run(&self, tool_name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        validate_args(&tool.parameters_schema(), &args).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: tool_name.to_string(),
                reason,
            }
        })?;

        match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(reason)) => Err(ToolError::ExecutionFailed {
                tool: tool_name.to_string(),
                reason,
            }),
            Err(_) => Err(ToolError::ExecutionFailed {
                tool: tool_name.to_string(),
                reason: "tool panicked".to_string(),
            }),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
