//! 持久化（persist）
//!
//! 定义聚合存储协议与实现：
//! - `AggregateStore`：最新快照读取、带 CAS 的原子提交、请求查找与发件箱读取；
//! - `InMemoryAggregateStore`：进程内实现，带故障注入；
//! - `PgAggregateStore`：Postgres 实现（`infra-sqlx` 特性）。
//!
mod inmemory;
#[cfg(feature = "infra-sqlx")]
mod pg;
mod store;

pub use inmemory::InMemoryAggregateStore;
#[cfg(feature = "infra-sqlx")]
pub use pg::PgAggregateStore;
pub use store::{AggregateStore, StoredEvent};
