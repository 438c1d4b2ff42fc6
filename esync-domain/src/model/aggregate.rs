use super::{AggregateId, Event, Operation, RequestId};
use crate::value_object::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 聚合的最新快照
///
/// 删除后保留墓碑（`deleted = true`），版本与最后请求 ID 仍然有效，
/// 以便幂等检查与版本单调性在删除之后依然成立。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub last_request_id: RequestId,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub state: Value,
    pub updated_at: DateTime<Utc>,
}

impl Aggregate {
    /// 事件应用后的快照
    pub fn from_event(event: &Event) -> Self {
        let deleted = event.operation() == Operation::Delete;
        Self {
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id().clone(),
            version: event.version(),
            last_request_id: event.request_id().clone(),
            deleted,
            state: event.payload().clone(),
            updated_at: event.occurred_at(),
        }
    }

    /// 未被删除
    pub fn exists(&self) -> bool {
        !self.deleted
    }
}
