//! web_fetch_page 工具：抓取网页正文
//!
//! GET 请求带超时与 User-Agent；HTML 响应用 html2text 提取可读文本（失败时回退为简易去标签），
//! 超过 max_chars 时截断。返回 JSON：{"source_url": ..., "content": ...}。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct FetchArgs {
    #[schemars(description = "The full URL of the web page to read.")]
    url: String,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
pub(crate) fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 判断内容是否像 HTML
pub(crate) fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head = s.get(..s.len().min(512)).unwrap_or(s).to_ascii_lowercase();
    head.starts_with("<!") || head.starts_with("<html") || head.contains("<body") || head.contains("<head")
}

/// 将 HTML 转为可读文本
pub(crate) fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// 网页抓取工具
pub struct WebFetchTool {
    client: Client,
    max_chars: usize,
}

impl WebFetchTool {
    pub fn new(timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }

    fn parse_url(raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw.trim()).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(format!("Unsupported URL scheme: {}", other)),
        }
    }

    async fn fetch(&self, url: Url) -> Result<String, String> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Failed to fetch content from the URL: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Failed to fetch content from the URL: HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if looks_like_html(body) {
            html_to_text(body)
        } else {
            body.to_string()
        };
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return Err("The page has no visible content.".to_string());
        }

        tracing::info!(url = %url, chars = text.chars().count(), "fetched page");
        Ok(json!({
            "source_url": url.as_str(),
            "content": truncate_chars(&text, self.max_chars),
        })
        .to_string())
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch_page"
    }

    fn description(&self) -> &str {
        "Use this tool to read the full text content of a specific web page, given its URL."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<FetchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: FetchArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let url = Self::parse_url(&args.url)?;
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_helpers() {
        let html = "<!DOCTYPE html><html><body><p>Hello <b>world</b></p></body></html>";
        assert!(looks_like_html(html));
        assert!(!looks_like_html("plain text"));
        assert_eq!(strip_html_tags(html), "Hello world");
        assert!(html_to_text(html).contains("Hello"));
    }

    #[test]
    fn test_parse_url_rejects_non_http() {
        assert!(WebFetchTool::parse_url("https://example.com/a").is_ok());
        assert!(WebFetchTool::parse_url("file:///etc/passwd").is_err());
        assert!(WebFetchTool::parse_url("not a url").is_err());
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
