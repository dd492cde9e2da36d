//! 可观测性：tracing 订阅器初始化
//!
//! RUST_LOG 优先；未设置时使用配置中的级别。输出到 stderr，stdout 留给事件流。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；重复调用（测试、嵌入方已安装）时静默忽略
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("not a level ((");
        tracing::info!("still logging");
    }
}
