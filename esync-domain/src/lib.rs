//! 命令到事件的同步引擎（esync-domain）
//!
//! 以文档存储为事实来源、以消息总线为分发通道，将命令可靠地转化为
//! 有序、可去重的领域事件：
//! - 命令校验（`validation`）与聚合类型注册（`registry`）
//! - 基于请求 ID 的幂等判定（`idempotency`）
//! - 乐观版本控制与状态推导（`versioning`）
//! - 先存储后发布的双写与对账补发（`engine`）
//! - 存储（`persist`）与总线（`eventing`）适配协议及其进程内实现
//!
//! 典型用法：
//! 1. 以 `AggregateDefinition` 声明聚合类型及其负载约束，注册到 `AggregateRegistry`；
//! 2. 选择 `AggregateStore` 与 `EventBus` 实现，构建 `SyncEngine`；
//! 3. 直接调用 `SyncEngine::process`，或 `start` 后台消费命令主题；
//! 4. 下游通过 `EventDispatcher` 订阅事件主题，按 `(aggregateId, version)` 去重。
//!
pub mod config;
pub mod engine;
pub mod error;
pub mod eventing;
pub mod idempotency;
pub mod model;
pub mod persist;
pub mod registry;
pub mod validation;
pub mod value_object;
pub mod versioning;
