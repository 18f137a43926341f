//! 活动闸门：判断 avatar 此刻是否可以执行某类自动化操作
//!
//! 纯函数、不缓存；按分钟变化，每个调用点都要重新求值。

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::core::AvatarProfile;

/// 按当前 UTC 时间判断
pub fn is_active(profile: &AvatarProfile, categories: &[String]) -> bool {
    is_active_at(profile, categories, Utc::now())
}

/// 无日程 → 总是活跃；categories 为空 → 检查全部类别；多个类别之间取 OR。
/// 日程中不存在的类别视为不活跃。
pub fn is_active_at(profile: &AvatarProfile, categories: &[String], now: DateTime<Utc>) -> bool {
    if profile.schedule.is_empty() {
        return true;
    }

    let weekday = now.weekday();
    let hour = now.hour();
    let in_window = |category: &str| {
        profile
            .schedule
            .get(category)
            .is_some_and(|w| w.days.contains(&weekday) && hour >= w.start_hour && hour < w.end_hour)
    };

    if categories.is_empty() {
        profile.schedule.keys().any(|c| in_window(c))
    } else {
        categories.iter().any(|c| in_window(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile(src: &str) -> AvatarProfile {
        AvatarProfile::from_toml("p", src).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    const WORK: &str = r#"
        name = "Worker"
        [schedule.work]
        days = ["mon", "tue", "wed", "thu", "fri"]
        start_hour = 9
        end_hour = 17
    "#;

    #[test]
    fn test_no_schedule_always_active() {
        let p = profile("name = \"Free\"");
        for h in [0, 5, 12, 23] {
            assert!(is_active_at(&p, &[], at(2024, 1, 6, h)));
            assert!(is_active_at(&p, &["work".into()], at(2024, 1, 3, h)));
        }
    }

    #[test]
    fn test_work_window() {
        let p = profile(WORK);
        let work = vec!["work".to_string()];
        // 2024-01-03 是周三，2024-01-06 是周六
        assert!(is_active_at(&p, &work, at(2024, 1, 3, 10)));
        assert!(!is_active_at(&p, &work, at(2024, 1, 6, 10)));
        assert!(!is_active_at(&p, &work, at(2024, 1, 3, 20)));
        assert!(is_active_at(&p, &work, at(2024, 1, 3, 9)));
        assert!(!is_active_at(&p, &work, at(2024, 1, 3, 17)));
    }

    #[test]
    fn test_categories_or_and_unknown() {
        let src = format!(
            "{}\n[schedule.social]\ndays = [5, 6]\nstart_hour = 0\nend_hour = 24\n",
            WORK
        );
        let p = profile(&src);
        let saturday = at(2024, 1, 6, 10);
        assert!(is_active_at(&p, &[], saturday));
        assert!(is_active_at(&p, &["work".into(), "social".into()], saturday));
        assert!(!is_active_at(&p, &["work".into()], saturday));
        assert!(!is_active_at(&p, &["gaming".into()], saturday));
    }
}
