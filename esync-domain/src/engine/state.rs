use crate::model::RequestId;
use crate::value_object::Version;
use std::fmt;

/// 单条命令的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingState {
    Received,
    Validating,
    Rejected,
    Deduplicating,
    DuplicateAck,
    Versioning,
    VersionConflict,
    StoreCommit,
    StoreFailed,
    BusPublish,
    BusFailed,
    Acknowledged,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Received => "RECEIVED",
            ProcessingState::Validating => "VALIDATING",
            ProcessingState::Rejected => "REJECTED",
            ProcessingState::Deduplicating => "DEDUPLICATING",
            ProcessingState::DuplicateAck => "DUPLICATE_ACK",
            ProcessingState::Versioning => "VERSIONING",
            ProcessingState::VersionConflict => "VERSION_CONFLICT",
            ProcessingState::StoreCommit => "STORE_COMMIT",
            ProcessingState::StoreFailed => "STORE_FAILED",
            ProcessingState::BusPublish => "BUS_PUBLISH",
            ProcessingState::BusFailed => "BUS_FAILED",
            ProcessingState::Acknowledged => "ACKNOWLEDGED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Rejected
                | ProcessingState::DuplicateAck
                | ProcessingState::VersionConflict
                | ProcessingState::StoreFailed
                | ProcessingState::BusFailed
                | ProcessingState::Acknowledged
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ProcessingState::Acknowledged | ProcessingState::DuplicateAck
        )
    }

    /// 合法迁移。去重阶段读存储失败记为 `StoreFailed`；
    /// 重试会从失败分支回到 `Deduplicating`（存储/冲突）或 `BusPublish`（总线）
    pub fn can_transition_to(&self, next: ProcessingState) -> bool {
        use ProcessingState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Rejected)
                | (Validating, Deduplicating)
                | (Deduplicating, DuplicateAck)
                | (Deduplicating, Versioning)
                | (Deduplicating, StoreFailed)
                | (Versioning, VersionConflict)
                | (Versioning, StoreCommit)
                | (StoreCommit, StoreFailed)
                | (StoreCommit, VersionConflict)
                | (StoreCommit, BusPublish)
                | (BusPublish, BusFailed)
                | (BusPublish, Acknowledged)
                | (VersionConflict, Deduplicating)
                | (StoreFailed, Deduplicating)
                | (BusFailed, BusPublish)
        )
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 命令处理的终态报告
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// 请求 ID；原始命令缺失请求 ID 时为 `None`（无法回执）
    pub request_id: Option<RequestId>,
    pub state: ProcessingState,
    pub version: Option<Version>,
    pub reason: Option<String>,
    /// 实际尝试次数（含首次）
    pub attempts: u32,
    /// 经过的状态序列
    pub path: Vec<ProcessingState>,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}
