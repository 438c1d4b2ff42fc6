//! 领域层统一错误定义
//!
//! 覆盖序列化、命令校验、版本冲突、存储/总线基础设施故障与超时，
//! 各适配器实现统一转换为 `DomainError`，引擎据此决定重试或终止。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 命令与注册 ---
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),

    // --- 并发控制 ---
    #[error("version conflict: aggregate={aggregate_id}, expected={expected}, actual={actual}")]
    VersionConflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    // --- 基础设施 ---
    #[error("aggregate store error: {reason}")]
    Store { reason: String },
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },
    #[error("timeout: operation={operation}, after={after_ms}ms")]
    Timeout {
        operation: &'static str,
        after_ms: u128,
    },
    #[error("database error: {reason}")]
    Database { reason: String },

    // --- 状态 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn store(reason: impl Into<String>) -> Self {
        DomainError::Store {
            reason: reason.into(),
        }
    }

    pub fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        DomainError::InvalidState {
            reason: reason.into(),
        }
    }

    /// 瞬时故障：并发冲突、存储/总线异常与超时，可在有限次数内退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::VersionConflict { .. }
                | DomainError::Store { .. }
                | DomainError::EventBus { .. }
                | DomainError::Timeout { .. }
                | DomainError::Database { .. }
        )
    }
}

// 基础设施层可直接使用 `?` 将 sqlx 错误转换为 DomainError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_faults_are_retryable() {
        assert!(DomainError::store("down").is_retryable());
        assert!(DomainError::event_bus("down").is_retryable());
        assert!(
            DomainError::Timeout {
                operation: "commit_event",
                after_ms: 5
            }
            .is_retryable()
        );
        assert!(
            DomainError::VersionConflict {
                aggregate_id: "p1".into(),
                expected: 1,
                actual: 2
            }
            .is_retryable()
        );
    }

    #[test]
    fn permanent_faults_are_not_retryable() {
        assert!(
            !DomainError::Validation {
                reason: "bad".into()
            }
            .is_retryable()
        );
        assert!(!DomainError::UnknownAggregateType("ghost".into()).is_retryable());
        assert!(!DomainError::invalid_state("broken").is_retryable());
    }
}
