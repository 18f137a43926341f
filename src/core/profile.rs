//! Avatar 配置档案：从 profiles 目录下的 TOML 文件加载（文件名即 avatar id），加载后不可变
//!
//! 日程的 days 可写 0-6（周一为 0）或星期名（mon / monday，大小写不敏感）。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::Weekday;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AvatarError;
use crate::integrations::ChannelKind;
use crate::llm::EngineKind;

/// 后端覆盖项：逐字段覆盖进程默认值
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmOverride {
    pub engine: Option<EngineKind>,
    pub model: Option<String>,
    /// 整体替换默认 options（不做键级合并）
    pub options: Option<Map<String, Value>>,
}

/// 某活动类别的每周时间窗（UTC）
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWindow {
    pub days: HashSet<Weekday>,
    /// 0 <= start_hour < end_hour <= 24，区间左闭右开
    pub start_hour: u32,
    pub end_hour: u32,
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DaySpec {
    Index(u8),
    Name(String),
}

impl DaySpec {
    fn to_weekday(&self) -> Result<Weekday, String> {
        match self {
            DaySpec::Index(i) => WEEK
                .get(*i as usize)
                .copied()
                .ok_or_else(|| format!("day index {} out of range 0-6", i)),
            DaySpec::Name(name) => name
                .trim()
                .parse::<Weekday>()
                .map_err(|_| format!("unknown day '{}'", name)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleToml {
    days: Vec<DaySpec>,
    start_hour: u32,
    end_hour: u32,
}

#[derive(Debug, Deserialize)]
struct ProfileToml {
    name: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    llm: LlmOverride,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    history_limits: HashMap<ChannelKind, usize>,
    #[serde(default)]
    schedule: BTreeMap<String, ScheduleToml>,
}

/// Avatar 档案
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarProfile {
    pub id: String,
    pub name: String,
    pub personality: String,
    pub llm: LlmOverride,
    /// 允许调用的工具名
    pub tools: Vec<String>,
    /// 各渠道读取历史的条数上限
    pub history_limits: HashMap<ChannelKind, usize>,
    /// 类别 → 时间窗；为空表示不受日程限制
    pub schedule: BTreeMap<String, ScheduleWindow>,
}

impl AvatarProfile {
    /// 解析 TOML 文本并校验日程
    pub fn from_toml(id: &str, src: &str) -> Result<Self, AvatarError> {
        let raw: ProfileToml = toml::from_str(src)
            .map_err(|e| AvatarError::Config(format!("profile '{}': {}", id, e)))?;

        let mut schedule = BTreeMap::new();
        for (category, window) in raw.schedule {
            if !(window.start_hour < window.end_hour && window.end_hour <= 24) {
                return Err(AvatarError::Config(format!(
                    "profile '{}': schedule '{}' needs 0 <= start_hour < end_hour <= 24, got {}..{}",
                    id, category, window.start_hour, window.end_hour
                )));
            }
            let days = window
                .days
                .iter()
                .map(DaySpec::to_weekday)
                .collect::<Result<HashSet<_>, _>>()
                .map_err(|e| AvatarError::Config(format!("profile '{}': schedule '{}': {}", id, category, e)))?;
            schedule.insert(
                category,
                ScheduleWindow {
                    days,
                    start_hour: window.start_hour,
                    end_hour: window.end_hour,
                },
            );
        }

        Ok(Self {
            id: id.to_string(),
            name: raw.name,
            personality: raw.personality,
            llm: raw.llm,
            tools: raw.tools,
            history_limits: raw.history_limits,
            schedule,
        })
    }

    /// 从单个文件加载，id 取文件名（不含扩展名）
    pub fn load(path: &Path) -> Result<Self, AvatarError> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AvatarError::Config(format!("invalid profile path: {}", path.display())))?;
        let src = std::fs::read_to_string(path)?;
        Self::from_toml(id, &src)
    }

    /// 某渠道的历史条数上限
    pub fn history_limit(&self, channel: ChannelKind, default: usize) -> usize {
        self.history_limits.get(&channel).copied().unwrap_or(default)
    }
}

/// 加载目录下全部 *.toml 档案（跳过隐藏文件；无效档案记录日志后跳过），按 id 排序
pub fn load_profiles(dir: &Path) -> Result<Vec<AvatarProfile>, AvatarError> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "profiles directory not found");
        return Ok(Vec::new());
    }

    let mut profiles = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if hidden || !is_toml || !path.is_file() {
            continue;
        }
        match AvatarProfile::load(&path) {
            Ok(profile) => profiles.push(profile),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "skipping invalid profile"),
        }
    }
    profiles.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::info!("Loaded {} avatar profiles", profiles.len());
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = r#"
        name = "Alice"
        personality = "Friendly and concise."
        tools = ["calculator", "wikipedia"]

        [llm]
        engine = "remote"
        model = "gpt-4o-mini"

        [history_limits]
        telegram = 4

        [schedule.work]
        days = [0, 1, 2, 3, 4]
        start_hour = 9
        end_hour = 17

        [schedule.social]
        days = ["sat", "Sunday"]
        start_hour = 10
        end_hour = 24
    "#;

    #[test]
    fn test_parse_profile() {
        let p = AvatarProfile::from_toml("alice", ALICE).unwrap();
        assert_eq!(p.id, "alice");
        assert_eq!(p.llm.engine, Some(EngineKind::Remote));
        assert_eq!(p.llm.options, None);
        assert_eq!(p.history_limit(ChannelKind::Telegram, 10), 4);
        assert_eq!(p.history_limit(ChannelKind::Email, 10), 10);

        let work = &p.schedule["work"];
        assert!(work.days.contains(&Weekday::Mon));
        assert!(work.days.contains(&Weekday::Fri));
        assert!(!work.days.contains(&Weekday::Sat));
        let social = &p.schedule["social"];
        assert!(social.days.contains(&Weekday::Sun));
        assert_eq!(social.end_hour, 24);
    }

    #[test]
    fn test_invalid_hours_rejected() {
        let src = r#"
            name = "Bad"
            [schedule.work]
            days = [0]
            start_hour = 17
            end_hour = 9
        "#;
        assert!(matches!(AvatarProfile::from_toml("bad", src), Err(AvatarError::Config(_))));

        let src = r#"
            name = "Bad"
            [schedule.work]
            days = [7]
            start_hour = 1
            end_hour = 2
        "#;
        assert!(AvatarProfile::from_toml("bad", src).is_err());
    }

    #[test]
    fn test_load_profiles_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bob.toml"), "name = \"Bob\"").unwrap();
        std::fs::write(dir.path().join("alice.toml"), ALICE).unwrap();
        std::fs::write(dir.path().join(".draft.toml"), "name = \"Draft\"").unwrap();
        std::fs::write(dir.path().join("broken.toml"), "name = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let profiles = load_profiles(dir.path()).unwrap();
        let ids: Vec<_> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert!(profiles[1].schedule.is_empty());
    }
}
