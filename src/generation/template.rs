//! 提示词模板：按名称加载，`{field}` 占位符替换（`{{` / `}}` 转义为字面大括号）
//!
//! 先查 prompts 目录，找不到再用内置默认模板。缺少替换字段是程序错误，直接返回 TemplateError。

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

/// 模板上下文：字段名 → 值
pub type PromptContext = HashMap<String, String>;

const BUILTIN: &[(&str, &str)] = &[
    (
        "email_reply_template.txt",
        include_str!("../../config/prompts/email_reply_template.txt"),
    ),
    (
        "github_comment_template.txt",
        include_str!("../../config/prompts/github_comment_template.txt"),
    ),
    (
        "telegram_message_template.txt",
        include_str!("../../config/prompts/telegram_message_template.txt"),
    ),
    (
        "discord_message_template.txt",
        include_str!("../../config/prompts/discord_message_template.txt"),
    ),
];

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template {template} requires field '{field}'")]
    MissingField { template: String, field: String },

    #[error("Malformed template {template}: {reason}")]
    Malformed { template: String, reason: String },

    #[error("Failed to read template {template}: {source}")]
    Io {
        template: String,
        #[source]
        source: std::io::Error,
    },
}

/// 模板仓库
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    dir: Option<PathBuf>,
}

impl PromptTemplates {
    /// 只使用内置模板
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    /// 优先从 dir 加载
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// 读取模板原文
    pub fn load(&self, name: &str) -> Result<String, TemplateError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        if let Some(dir) = &self.dir {
            let path = dir.join(name);
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
                    template: name.to_string(),
                    source,
                });
            }
        }
        BUILTIN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| body.to_string())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    /// 加载并替换
    pub fn render(&self, name: &str, context: &PromptContext) -> Result<String, TemplateError> {
        let template = self.load(name)?;
        render_str(name, &template, context)
    }
}

/// 替换 `{field}` 占位符
pub fn render_str(name: &str, template: &str, context: &PromptContext) -> Result<String, TemplateError> {
    let malformed = |reason: &str| TemplateError::Malformed {
        template: name.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err(malformed("nested '{' in placeholder")),
                        Some(ch) => field.push(ch),
                        None => return Err(malformed("unclosed '{'")),
                    }
                }
                let field = field.trim();
                if field.is_empty() {
                    return Err(malformed("empty placeholder"));
                }
                let value = context.get(field).ok_or_else(|| TemplateError::MissingField {
                    template: name.to_string(),
                    field: field.to_string(),
                })?;
                out.push_str(value);
            }
            '}' => return Err(malformed("single '}' encountered")),
            _ => out.push(c),
        }
    }
    Ok(out)
}
