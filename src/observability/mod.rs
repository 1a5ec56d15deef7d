//! 可观测性：按 `[log]` 初始化 tracing
//!
//! RUST_LOG 存在时覆盖配置中的级别；format 为 console 或 json。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogSection;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局订阅者；重复初始化时返回 false（测试中常见）
pub fn init(section: &LogSection) -> bool {
    let filter = env_filter(&section.level);
    let result = if section.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        // 非法指令不会 panic
        let _ = env_filter("not a [valid directive");
    }

    #[test]
    fn test_second_init_reports_false() {
        let section = LogSection::default();
        let _ = init(&section);
        assert!(!init(&section));
    }
}
