//! 可观测性：tracing 日志初始化
//!
//! RUST_LOG 优先；未设置时使用配置中的 [app].log_level。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 构造过滤器；level 无法解析时退回 info
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局订阅者；重复调用时忽略
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(false))
        .try_init();
}
