//! 单轮工具调用协议：PROPOSE → EXECUTE → FINALIZE
//!
//! - PROPOSE：附带 allowlist 内工具的 schema 发送；回复不含工具调用则直接结束
//! - EXECUTE：按收到的顺序逐个执行；未知工具 / 参数不合法 / 执行失败都变成错误结果，互不影响
//! - FINALIZE：追加一条「只依据工具结果作答」的指令，不带工具重新发送；结果原样返回
//!
//! 最多两次后端往返，不支持多轮工具链。

use crate::llm::{AssistantTurn, BackendSelection, ChatBackendAdapter, ChatMessage, LlmError, ToolCallRequest};
use crate::tools::{ToolError, ToolExecutor};

/// FINALIZE 阶段追加的指令
pub const FINALIZE_INSTRUCTION: &str = "Answer the original request using ONLY the tool results above. \
If the results are empty, contain errors, or are not relevant to the request, say so plainly instead of guessing. \
Do not invent facts that are not in the results and do not ask to use any more tools.";

/// 一次工具循环的结果
#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    /// 最终文本
    pub text: String,
    /// 完整消息列表（含工具调用回合与结果回合）
    pub messages: Vec<ChatMessage>,
    /// 后端往返次数（1 或 2）
    pub round_trips: usize,
}

/// 工具循环
#[derive(Clone)]
pub struct ToolCallLoop {
    adapter: ChatBackendAdapter,
    executor: ToolExecutor,
}

impl ToolCallLoop {
    pub fn new(adapter: ChatBackendAdapter, executor: ToolExecutor) -> Self {
        Self { adapter, executor }
    }

    pub fn adapter(&self) -> &ChatBackendAdapter {
        &self.adapter
    }

    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        selection: &BackendSelection,
        allowlist: &[String],
    ) -> Result<ToolLoopOutcome, LlmError> {
        // PROPOSE
        let tools = self.executor.registry().definitions_for(allowlist);
        let calls = match self.adapter.complete(&messages, selection, &tools).await? {
            AssistantTurn::Text(text) => {
                return Ok(ToolLoopOutcome {
                    text,
                    messages,
                    round_trips: 1,
                });
            }
            AssistantTurn::ToolCalls(calls) => calls,
        };

        // EXECUTE
        tracing::info!(count = calls.len(), "model requested tool calls");
        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let content = self.execute_call(call, allowlist).await;
            results.push(ChatMessage::tool_result(call.id.clone(), content));
        }
        messages.push(ChatMessage::assistant_tool_calls(calls));
        messages.extend(results);

        // FINALIZE
        messages.push(ChatMessage::user(FINALIZE_INSTRUCTION));
        let text = match self.adapter.complete(&messages, selection, &[]).await? {
            AssistantTurn::Text(text) => text,
            AssistantTurn::ToolCalls(extra) => {
                tracing::warn!(count = extra.len(), "model requested tools again after the tool round, ignoring");
                String::new()
            }
        };
        Ok(ToolLoopOutcome {
            text,
            messages,
            round_trips: 2,
        })
    }

    /// 执行一次调用；任何失败都转为错误字符串
    async fn execute_call(&self, call: &ToolCallRequest, allowlist: &[String]) -> String {
        let result = if allowlist.iter().any(|t| t == &call.name) {
            self.executor.execute(&call.name, call.arguments.clone()).await
        } else {
            Err(ToolError::UnknownTool(call.name.clone()))
        };
        match result {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                format!("Error: {}", e)
            }
        }
    }
}
