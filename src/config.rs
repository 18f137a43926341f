//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AVATARS__*` 覆盖（双下划线表示嵌套，如 `AVATARS__LLM__MODEL=llama3:8b`）。
//! 配置结构显式传入各组件构造函数，不存在全局默认值查询。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::integrations::ChannelKind;
use crate::llm::EngineKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embeddings: EmbeddingsSection,
    pub rag: RagSection,
    pub database: DatabaseSection,
    pub avatar: AvatarSection,
    pub tools: ToolsSection,
    pub channels: ChannelsSection,
}

/// [app] 段：应用名、日志级别、profile 与 prompt 目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// RUST_LOG 未设置时使用的日志级别
    pub log_level: String,
    pub profiles_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "avatar-crew".to_string(),
            log_level: "info".to_string(),
            profiles_dir: PathBuf::from("profiles"),
            prompts_dir: PathBuf::from("config/prompts"),
        }
    }
}

/// [llm] 段：进程级默认后端（profile 可逐字段覆盖）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub engine: EngineKind,
    pub model: String,
    /// 采样参数（temperature 等），原样透传给后端
    pub options: Map<String, Value>,
    /// 回复过滤器使用的模型（固定 temperature = 0）
    pub filter_model: String,
    pub local: LocalBackendSection,
    pub remote: RemoteBackendSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        let mut options = Map::new();
        options.insert("temperature".to_string(), Value::from(0.7));
        Self {
            engine: EngineKind::Local,
            model: "llama3:8b".to_string(),
            options,
            filter_model: "llama3:8b".to_string(),
            local: LocalBackendSection::default(),
            remote: RemoteBackendSection::default(),
        }
    }
}

/// [llm.local] 段：本地推理服务（Ollama 兼容 /api/chat）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalBackendSection {
    pub base_url: String,
}

impl Default for LocalBackendSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

/// [llm.remote] 段：远程 OpenAI 兼容 /chat/completions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteBackendSection {
    pub base_url: String,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
}

impl Default for RemoteBackendSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [embeddings] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingsSection {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// [rag] 段：检索与入库参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSection {
    /// 每次检索返回的最多块数
    pub limit: usize,
    /// 距离阈值：距离 >= 阈值的块被排除；None 表示不限制
    pub distance_threshold: Option<f32>,
    pub knowledge_base_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub ingest_extensions: Vec<String>,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            limit: 3,
            distance_threshold: None,
            knowledge_base_dir: PathBuf::from("knowledge_base"),
            chunk_size: 500,
            chunk_overlap: 50,
            ingest_extensions: vec![".txt".into(), ".md".into(), ".html".into(), ".htm".into()],
        }
    }
}

/// [database] 段：SQLite 地址与向量维度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// 为空时使用内存存储
    pub url: Option<String>,
    pub vector_dimension: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: Some("sqlite:avatars.db?mode=rwc".to_string()),
            vector_dimension: 768,
        }
    }
}

/// [avatar] 段：profile 未指定时的默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarSection {
    pub default_history_limit: usize,
}

impl Default for AvatarSection {
    fn default() -> Self {
        Self {
            default_history_limit: 10,
        }
    }
}

/// [tools] 段：内置工具参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub default_search_language: String,
    /// web_fetch_page 返回的最大字符数
    pub max_page_chars: usize,
    /// wikipedia 摘要的最大字符数
    pub max_summary_chars: usize,
    pub request_timeout_secs: u64,
    pub web_search: WebSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            default_search_language: "en".to_string(),
            max_page_chars: 4000,
            max_summary_chars: 500,
            request_timeout_secs: 10,
            web_search: WebSearchSection::default(),
        }
    }
}

/// [tools.web_search] 段：Google Custom Search 凭据所在的环境变量名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub api_key_env: String,
    pub engine_id_env: String,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            api_key_env: "GOOGLE_SEARCH_API_KEY".to_string(),
            engine_id_env: "GOOGLE_SEARCH_ENGINE_ID".to_string(),
        }
    }
}

/// [channels] 段：各渠道的巡检设置，键为渠道名（email / github / telegram / discord）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(transparent)]
pub struct ChannelsSection(pub HashMap<ChannelKind, ChannelOverride>);

impl ChannelsSection {
    /// 取渠道设置：配置文件中出现的字段覆盖该渠道的内置默认值，其余字段保持默认
    pub fn get(&self, channel: ChannelKind) -> ChannelSection {
        let mut section = ChannelSection::defaults_for(channel);
        if let Some(o) = self.0.get(&channel) {
            if let Some(v) = o.enabled {
                section.enabled = v;
            }
            if let Some(v) = o.interval_minutes {
                section.interval_minutes = v;
            }
            if let Some(v) = &o.categories {
                section.categories = v.clone();
            }
            if let Some(v) = o.filter_replies {
                section.filter_replies = v;
            }
            if let Some(v) = &o.template {
                section.template = v.clone();
            }
        }
        section
    }
}

/// 配置文件中的渠道覆盖项（均可省略）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelOverride {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<u64>,
    pub categories: Option<Vec<String>>,
    pub filter_replies: Option<bool>,
    pub template: Option<String>,
}

/// 单个渠道的有效巡检设置
#[derive(Debug, Clone)]
pub struct ChannelSection {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// 闸门检查的活动类别；为空表示任一日程窗口均可
    pub categories: Vec<String>,
    /// 是否先经过回复过滤器（fail-closed）
    pub filter_replies: bool,
    pub template: String,
}

impl ChannelSection {
    pub fn defaults_for(channel: ChannelKind) -> Self {
        let (interval_minutes, filter_replies) = match channel {
            ChannelKind::Email => (4, true),
            ChannelKind::Github => (8, false),
            ChannelKind::Telegram => (2, false),
            ChannelKind::Discord => (5, false),
        };
        Self {
            enabled: true,
            interval_minutes,
            categories: Vec::new(),
            filter_replies,
            template: channel.default_template().to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 AVATARS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AVATARS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AVATARS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
