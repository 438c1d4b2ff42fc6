//! 同步引擎（engine）
//!
//! 命令处理流水线及其运行时：
//! - `SyncEngine`：校验 → 去重 → 版本解析 → 存储提交 → 总线发布 → 回执；
//! - `ProcessingState`/`CommandOutcome`：逐命令状态机与终态报告；
//! - `AggregateLocks`：聚合级串行化；
//! - `RetryPolicy`：有界指数退避；
//! - `AcknowledgmentEmitter`：回执发送；
//! - 对账（`reconcile_once`）与后台运行（`start` → `EngineHandle`）。
//!
mod acknowledgment;
mod handle;
mod locks;
mod reconciler;
mod retry;
mod runtime;
mod state;
mod sync_engine;

pub use acknowledgment::{AcknowledgmentEmitter, BusAcknowledgmentEmitter, RecordingEmitter};
pub use handle::EngineHandle;
pub use locks::AggregateLocks;
pub use reconciler::ReconcileReport;
pub use retry::RetryPolicy;
pub use state::{CommandOutcome, ProcessingState};
pub use sync_engine::{PUBLISH_PENDING, SyncEngine};
