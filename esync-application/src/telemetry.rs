//! 日志初始化
//!
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// 安装 fmt 订阅器，级别取自 `RUST_LOG`（缺省 `info`）
///
/// 可重复调用，之后的调用不生效。
pub fn init() {
    init_with(false);
}

/// 同 [`init`]，`json = true` 时输出 JSON 行；返回本次是否完成安装
pub fn init_with(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.is_ok()
}
