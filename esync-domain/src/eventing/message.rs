//! 总线消息（BusMessage）
//!
//! 命令、事件与回执在总线上的统一线上形态：JSON 负载 + 去重键 + 分区键。
//!
use crate::model::{AggregateId, RequestId};
use crate::value_object::Version;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// 幂等发布键：总线对相同键的重复发布只投递一次
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// 事件的幂等键：`<aggregateId>@<version>`
    pub fn for_event(aggregate_id: &AggregateId, version: Version) -> Self {
        Self(format!("{aggregate_id}@{}", version.value()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    /// 消息唯一标识（每次发布尝试都不同）
    #[builder(default = Uuid::now_v7().to_string())]
    message_id: String,
    /// 幂等发布键，`None` 表示不参与去重
    dedup_key: Option<IdempotencyKey>,
    /// 分区/路由键：命令与事件为聚合 ID，回执为请求 ID
    partition_key: Option<String>,
    /// 负载
    payload: Value,
    #[builder(default = Utc::now())]
    published_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn dedup_key(&self) -> Option<&IdempotencyKey> {
        self.dedup_key.as_ref()
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// 以请求 ID 作为分区键（回执路由）
    pub fn keyed_by_request(request_id: &RequestId, payload: Value) -> Self {
        BusMessage::builder()
            .partition_key(request_id.to_string())
            .payload(payload)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_combines_aggregate_and_version() {
        let key = IdempotencyKey::for_event(&AggregateId::from("p1"), Version::from_value(2));
        assert_eq!(key.as_str(), "p1@2");
    }

    #[test]
    fn message_ids_are_unique_per_message() {
        let a = BusMessage::builder().payload(Value::Null).build();
        let b = BusMessage::builder().payload(Value::Null).build();
        assert_ne!(a.message_id(), b.message_id());
        assert!(a.dedup_key().is_none());
    }
}
