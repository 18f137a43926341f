//! web_search 工具：Google Custom Search JSON API
//!
//! 凭据从环境变量读取（变量名可配置）；缺失时返回错误结果而不是发请求。
//! 返回 JSON：{"results": [{title, link, snippet}, ...]}。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ToolsSection;
use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    #[schemars(description = "The search query to use.")]
    query: String,
    #[schemars(description = "The language for the search (e.g., 'en', 'it').")]
    lang: Option<String>,
    #[schemars(description = "The number of search results to return (1-10). Defaults to 3.")]
    num_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

/// 网页搜索工具
pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
    engine_id: Option<String>,
    default_lang: String,
}

impl WebSearchTool {
    pub fn new(
        api_key: Option<String>,
        engine_id: Option<String>,
        default_lang: &str,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            engine_id: engine_id.filter(|k| !k.is_empty()),
            default_lang: default_lang.to_string(),
        }
    }

    /// 从 [tools] 配置创建，凭据取自其中指定的环境变量
    pub fn from_config(cfg: &ToolsSection) -> Self {
        Self::new(
            std::env::var(&cfg.web_search.api_key_env).ok(),
            std::env::var(&cfg.web_search.engine_id_env).ok(),
            &cfg.default_search_language,
            cfg.request_timeout_secs,
        )
    }

    fn format_results(items: Vec<SearchItem>) -> Result<String, String> {
        if items.is_empty() {
            return Err("No results found.".to_string());
        }
        let results: Vec<Value> = items
            .into_iter()
            .map(|i| json!({ "title": i.title, "link": i.link, "snippet": i.snippet }))
            .collect();
        Ok(json!({ "results": results }).to_string())
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Use this tool to get current events, recent information, or timely news on any topic using Google Search. Returns a list of search results with titles, links, and snippets."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<SearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchArgs =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        let (Some(key), Some(cx)) = (self.api_key.as_deref(), self.engine_id.as_deref()) else {
            tracing::error!("web search credentials are not configured");
            return Err(
                "Google Search API key or Search Engine ID are not configured.".to_string(),
            );
        };

        let lang = args.lang.as_deref().unwrap_or(&self.default_lang);
        let num = args.num_results.unwrap_or(3).clamp(1, 10).to_string();
        let lr = format!("lang_{}", lang);
        tracing::debug!(query = %args.query, lang = %lang, "web search");

        let resp = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("key", key),
                ("cx", cx),
                ("q", args.query.as_str()),
                ("num", num.as_str()),
                ("lr", lr.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("An error occurred during the search: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("An error occurred during the search: HTTP {}", resp.status()));
        }
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("An error occurred during the search: {}", e))?;
        Self::format_results(parsed.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credentials_is_error() {
        let tool = WebSearchTool::new(None, Some("cx".into()), "en", 5);
        let err = tool.execute(json!({"query": "rust"})).await.unwrap_err();
        assert!(err.contains("not configured"));
    }

    #[test]
    fn test_format_results() {
        let items = vec![SearchItem {
            title: "Rust".into(),
            link: "https://www.rust-lang.org".into(),
            snippet: "A language".into(),
        }];
        let out: Value = serde_json::from_str(&WebSearchTool::format_results(items).unwrap()).unwrap();
        assert_eq!(out["results"][0]["title"], "Rust");
        assert!(WebSearchTool::format_results(vec![]).is_err());
    }

    #[test]
    fn test_schema_has_query_required() {
        let schema = WebSearchTool::new(None, None, "en", 5).parameters_schema();
        assert_eq!(schema["required"], json!(["query"]));
    }
}
