use super::{AggregateId, RequestId};
use crate::error::{DomainError, DomainResult};
use crate::eventing::BusMessage;
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// 命令操作类型（CUD）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::Validation {
                reason: format!("unknown operation: {s}"),
            })
    }
}

/// 已通过校验的命令，发布后不可变
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    operation: Operation,
    #[builder(into)]
    aggregate_type: String,
    #[builder(into)]
    aggregate_id: AggregateId,
    #[builder(into)]
    request_id: RequestId,
    #[builder(default)]
    payload: Value,
}

impl Command {
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

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 序列化为命令主题上的消息，分区键为聚合 ID
    pub fn to_message(&self) -> DomainResult<BusMessage> {
        Ok(BusMessage::builder()
            .partition_key(self.aggregate_id.to_string())
            .payload(serde_json::to_value(RawCommand::from(self))?)
            .build())
    }
}

/// 线上原始命令：字段均可缺失，经 `CommandValidator` 校验后方可转换为 `Command`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCommand {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub aggregate_type: Option<String>,
    #[serde(default)]
    pub aggregate_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// 存在但不是字符串的字段，由校验器报告为违例
    #[serde(skip)]
    pub mistyped: Vec<&'static str>,
}

impl RawCommand {
    /// 逐字段解码：类型不符的字段记入 `mistyped` 而不是整体失败，
    /// 只有消息本身不是 JSON 对象时才返回错误
    pub fn from_message(message: &BusMessage) -> DomainResult<Self> {
        let Value::Object(fields) = message.payload() else {
            return Err(DomainError::Validation {
                reason: "command message must be a JSON object".to_string(),
            });
        };

        let mut raw = RawCommand {
            payload: fields.get("payload").filter(|v| !v.is_null()).cloned(),
            ..RawCommand::default()
        };
        raw.operation = raw.text_field(fields, "operation");
        raw.aggregate_type = raw.text_field(fields, "aggregateType");
        raw.aggregate_id = raw.text_field(fields, "aggregateId");
        raw.request_id = raw.text_field(fields, "requestId");
        Ok(raw)
    }

    fn text_field(&mut self, fields: &Map<String, Value>, name: &'static str) -> Option<String> {
        match fields.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.mistyped.push(name);
                None
            }
        }
    }

    /// 非空白的请求 ID；缺失时无法回执
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(RequestId::from)
    }
}

impl From<&Command> for RawCommand {
    fn from(command: &Command) -> Self {
        RawCommand {
            operation: Some(command.operation.as_str().to_string()),
            aggregate_type: Some(command.aggregate_type.clone()),
            aggregate_id: Some(command.aggregate_id.to_string()),
            request_id: Some(command.request_id.to_string()),
            payload: Some(command.payload.clone()),
            mistyped: Vec::new(),
        }
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = DomainError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        fn required(field: &str, value: Option<String>) -> DomainResult<String> {
            value.ok_or_else(|| DomainError::Validation {
                reason: format!("{field}: is required"),
            })
        }

        let operation: Operation = required("operation", raw.operation)?.parse()?;

        Ok(Command {
            operation,
            aggregate_type: required("aggregateType", raw.aggregate_type)?,
            aggregate_id: required("aggregateId", raw.aggregate_id)?.into(),
            request_id: required("requestId", raw.request_id)?.into(),
            payload: raw.payload.unwrap_or(Value::Null),
        })
    }
}
