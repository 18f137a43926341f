//! wikipedia 工具：Wikipedia REST 摘要接口（/api/rest_v1/page/summary/{title}）
//!
//! 摘要截断到 max_chars 并追加 "..."；页面不存在时返回错误结果。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WikipediaArgs {
    #[schemars(description = "The title of the page to search for.")]
    query: String,
    #[schemars(description = "The language of the Wikipedia to search (e.g., 'en', 'it', 'es'). Defaults to 'en'.")]
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
}

/// Wikipedia 摘要工具
pub struct WikipediaTool {
    client: Client,
    max_chars: usize,
}

/// 语言代码只允许字母与连字符（如 en、zh-yue），防止拼出任意主机名
fn valid_lang(lang: &str) -> bool {
    !lang.is_empty() && lang.len() <= 12 && lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
}

impl WikipediaTool {
    pub fn new(timeout_secs: u64, max_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("AvatarCrew/1.0")
            .build()
            .unwrap_or_default();
        Self { client, max_chars }
    }

    fn summary_url(lang: &str, title: &str) -> Result<Url, String> {
        if !valid_lang(lang) {
            return Err(format!("Invalid language code: {}", lang));
        }
        let mut url = Url::parse(&format!("https://{}.wikipedia.org/api/rest_v1/page/summary/", lang))
            .map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| "cannot build Wikipedia URL".to_string())?
            .pop_if_empty()
            .push(&title.trim().replace(' ', "_"));
        Ok(url)
    }

    fn truncate_summary(&self, extract: &str) -> String {
        let head: String = extract.chars().take(self.max_chars).collect();
        format!("{}...", head)
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Use this tool for general, encyclopedic, or historical information. Best for questions like 'what is...' or 'who was...'."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<WikipediaArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: WikipediaArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let lang = args.lang.as_deref().unwrap_or("en");
        let url = Self::summary_url(lang, &args.query)?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Error during Wikipedia search: {}", e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(format!("Page '{}' not found.", args.query));
        }
        if !resp.status().is_success() {
            return Err(format!("Error during Wikipedia search: HTTP {}", resp.status()));
        }
        let summary: Summary = resp
            .json()
            .await
            .map_err(|e| format!("Error during Wikipedia search: {}", e))?;
        if summary.extract.trim().is_empty() {
            return Err(format!("Page '{}' not found.", args.query));
        }
        Ok(json!({
            "title": summary.title,
            "summary": self.truncate_summary(&summary.extract),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_url() {
        let url = WikipediaTool::summary_url("en", "Ada Lovelace").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/summary/Ada_Lovelace"
        );
        let url = WikipediaTool::summary_url("it", "C/C++").unwrap();
        assert!(url.as_str().ends_with("/summary/C%2FC++"));
        assert!(WikipediaTool::summary_url("evil.com/x", "a").is_err());
    }

    #[test]
    fn test_truncate_summary() {
        let tool = WikipediaTool::new(5, 5);
        assert_eq!(tool.truncate_summary("abcdefgh"), "abcde...");
        assert_eq!(tool.truncate_summary("abc"), "abc...");
    }
}
