//! esync 应用层
//!
//! 面向命令生产方的外围：
//! - `CommandGateway`：发布命令并按请求 ID 等待回执；
//! - `Settings`：引擎与网关配置（TOML）；
//! - `telemetry`：tracing 订阅器初始化。
//!
pub mod error;
pub mod gateway;
pub mod settings;
pub mod telemetry;

pub use error::AppError;
pub use gateway::{CommandGateway, GatewayConfig};
pub use settings::Settings;
