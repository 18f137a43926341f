//! 回复生成层：提示词模板、工具循环、回复生成与回复过滤

pub mod filter;
pub mod generator;
pub mod template;
pub mod tool_loop;

pub use filter::ReplyFilter;
pub use generator::{format_rag_context, ResponseGenerator, FALLBACK_REPLY, RAG_CONTEXT_KEY, RAG_QUERY_KEY};
pub use template::{render_str, PromptContext, PromptTemplates, TemplateError};
pub use tool_loop::{ToolCallLoop, ToolLoopOutcome, FINALIZE_INSTRUCTION};
