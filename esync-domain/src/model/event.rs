use super::{AggregateId, Command, Operation, RequestId};
use crate::error::DomainResult;
use crate::eventing::{BusMessage, IdempotencyKey};
use crate::value_object::Version;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 已提交的领域事件：命令被接受后的不可变事实
///
/// 事件的 `payload` 为命令应用后聚合的完整状态快照，消费方无需回放即可重建视图。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[builder(default = Uuid::now_v7().to_string())]
    event_id: String,
    operation: Operation,
    #[builder(into)]
    aggregate_type: String,
    #[builder(into)]
    aggregate_id: AggregateId,
    #[builder(into)]
    request_id: RequestId,
    version: Version,
    #[builder(default)]
    payload: Value,
    #[builder(default = Utc::now())]
    occurred_at: DateTime<Utc>,
}

impl Event {
    /// 由命令与新版本派生事件
    pub fn from_command(command: &Command, version: Version, payload: Value) -> Self {
        Event::builder()
            .operation(command.operation())
            .aggregate_type(command.aggregate_type())
            .aggregate_id(command.aggregate_id().clone())
            .request_id(command.request_id().clone())
            .version(version)
            .payload(payload)
            .build()
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// 发布键 `(aggregateId, version)`
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_event(&self.aggregate_id, self.version)
    }

    pub fn to_message(&self) -> DomainResult<BusMessage> {
        Ok(BusMessage::builder()
            .dedup_key(self.idempotency_key())
            .partition_key(self.aggregate_id.to_string())
            .payload(serde_json::to_value(self)?)
            .build())
    }

    pub fn from_message(message: &BusMessage) -> DomainResult<Self> {
        Ok(serde_json::from_value(message.payload().clone())?)
    }
}
