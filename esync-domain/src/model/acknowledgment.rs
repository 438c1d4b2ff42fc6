use super::RequestId;
use crate::error::DomainResult;
use crate::eventing::BusMessage;
use crate::value_object::Version;
use serde::{Deserialize, Serialize};

/// 命令处理结果回执，按请求 ID 关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub request_id: RequestId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl Acknowledgment {
    pub const DUPLICATE_REASON: &'static str = "duplicate request";

    pub fn accepted(request_id: RequestId, version: Version) -> Self {
        Self {
            request_id,
            accepted: true,
            reason: None,
            version: Some(version),
        }
    }

    /// 重复请求：仍视为已接受，返回首次应用时的版本
    pub fn duplicate(request_id: RequestId, version: Option<Version>) -> Self {
        Self {
            request_id,
            accepted: true,
            reason: Some(Self::DUPLICATE_REASON.to_string()),
            version,
        }
    }

    pub fn rejected(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            accepted: false,
            reason: Some(reason.into()),
            version: None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.accepted && self.reason.as_deref() == Some(Self::DUPLICATE_REASON)
    }

    pub fn to_message(&self) -> DomainResult<BusMessage> {
        Ok(BusMessage::keyed_by_request(
            &self.request_id,
            serde_json::to_value(self)?,
        ))
    }

    pub fn from_message(message: &BusMessage) -> DomainResult<Self> {
        Ok(serde_json::from_value(message.payload().clone())?)
    }
}
