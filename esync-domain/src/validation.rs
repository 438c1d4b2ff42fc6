//! 命令校验（CommandValidator）
//!
//! 对线上原始命令做结构与语义检查：必填字段、操作类型、聚合类型是否注册、
//! 负载是否满足该类型声明的约束。纯函数，无 I/O；通过时产出类型化的 `Command`。
//!
use crate::model::{AggregateId, Command, Operation, RawCommand, RequestId};
use crate::registry::AggregateRegistry;
use crate::value_object::ValueObject;
use serde_json::Value;
use std::{fmt, sync::Arc};

/// JSON 值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonKind::Null,
            Value::Bool(_) => JsonKind::Bool,
            Value::Number(_) => JsonKind::Number,
            Value::String(_) => JsonKind::String,
            Value::Array(_) => JsonKind::Array,
            Value::Object(_) => JsonKind::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonKind::Null => "null",
            JsonKind::Bool => "boolean",
            JsonKind::Number => "number",
            JsonKind::String => "string",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        }
    }
}

/// 负载约束。字段名支持以 `.` 分隔的嵌套路径，如 `owner.name`
#[derive(Debug, Clone)]
pub enum PayloadConstraint {
    /// 创建时必须存在且非 null
    Required(String),
    /// 存在时不得为空串/空数组/空对象
    NonEmpty(String),
    /// 存在时必须为指定类型
    OfKind(String, JsonKind),
    /// 存在时字符串字符数（或数组长度）不超过上限
    MaxLength(String, usize),
    /// 存在时必须取自给定集合
    OneOf(String, Vec<Value>),
    /// 对整个负载的自定义检查
    Custom(&'static str, fn(&Value) -> bool),
}

impl PayloadConstraint {
    pub fn required(field: impl Into<String>) -> Self {
        Self::Required(field.into())
    }

    pub fn non_empty(field: impl Into<String>) -> Self {
        Self::NonEmpty(field.into())
    }

    pub fn of_kind(field: impl Into<String>, kind: JsonKind) -> Self {
        Self::OfKind(field.into(), kind)
    }

    pub fn max_length(field: impl Into<String>, max: usize) -> Self {
        Self::MaxLength(field.into(), max)
    }

    pub fn one_of(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::OneOf(field.into(), values.into_iter().collect())
    }

    fn check(&self, operation: Operation, payload: &Value, out: &mut Vec<Violation>) {
        match self {
            PayloadConstraint::Required(field) => {
                if operation == Operation::Create
                    && lookup(payload, field).is_none_or(Value::is_null)
                {
                    out.push(Violation::new(field, "is required"));
                }
            }
            PayloadConstraint::NonEmpty(field) => {
                if let Some(value) = lookup(payload, field) {
                    let empty = match value {
                        Value::Null => true,
                        Value::String(s) => s.trim().is_empty(),
                        Value::Array(a) => a.is_empty(),
                        Value::Object(o) => o.is_empty(),
                        _ => false,
                    };
                    if empty {
                        out.push(Violation::new(field, "must not be empty"));
                    }
                }
            }
            PayloadConstraint::OfKind(field, kind) => {
                if lookup(payload, field).is_some_and(|v| JsonKind::of(v) != *kind) {
                    out.push(Violation::new(field, format!("must be a {}", kind.as_str())));
                }
            }
            PayloadConstraint::MaxLength(field, max) => {
                let len = match lookup(payload, field) {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    _ => 0,
                };
                if len > *max {
                    out.push(Violation::new(field, format!("must be at most {max} long")));
                }
            }
            PayloadConstraint::OneOf(field, allowed) => {
                if lookup(payload, field).is_some_and(|v| !allowed.contains(v)) {
                    let allowed = allowed
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    out.push(Violation::new(field, format!("must be one of [{allowed}]")));
                }
            }
            PayloadConstraint::Custom(name, check) => {
                if !check(payload) {
                    out.push(Violation::new("payload", *name));
                }
            }
        }
    }
}

fn lookup<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(payload, |value, segment| value.as_object()?.get(segment))
}

/// 单条约束违例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub constraint: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.constraint)
    }
}

/// 校验结果：违例列表（可能为空）与通过时的类型化命令
#[derive(Debug, Clone)]
pub struct ValidationResult {
    violations: Vec<Violation>,
    command: Option<Command>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// 以 `; ` 拼接的违例描述，用于拒绝回执
    pub fn reason(&self) -> String {
        self.violations
            .iter()
            .map(Violation::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn into_command(self) -> Result<Command, Vec<Violation>> {
        match self.command {
            Some(command) if self.violations.is_empty() => Ok(command),
            _ => Err(self.violations),
        }
    }
}

/// 命令校验器
#[derive(Debug, Clone)]
pub struct CommandValidator {
    registry: Arc<AggregateRegistry>,
}

impl CommandValidator {
    pub fn new(registry: Arc<AggregateRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, raw: &RawCommand) -> ValidationResult {
        let mut violations = Vec::new();

        let request_id =
            required_id::<RequestId>(raw, "requestId", &raw.request_id, &mut violations);
        let aggregate_id =
            required_id::<AggregateId>(raw, "aggregateId", &raw.aggregate_id, &mut violations);

        let operation = match raw.operation.as_deref() {
            None => {
                violations.push(absent(raw, "operation"));
                None
            }
            Some(op) => match op.parse::<Operation>() {
                Ok(op) => Some(op),
                Err(_) => {
                    violations.push(Violation::new(
                        "operation",
                        format!("unknown operation {op:?}"),
                    ));
                    None
                }
            },
        };

        let definition = match raw.aggregate_type.as_deref() {
            None => {
                violations.push(absent(raw, "aggregateType"));
                None
            }
            Some(ty) => match self.registry.get(ty) {
                Some(def) => Some(def),
                None => {
                    violations.push(Violation::new(
                        "aggregateType",
                        format!("unknown aggregate type {ty:?}"),
                    ));
                    None
                }
            },
        };

        let payload = raw.payload.clone().unwrap_or(Value::Null);
        if let Some(operation) = operation.filter(|op| *op != Operation::Delete) {
            if payload.is_object() {
                if let Some(def) = definition {
                    for constraint in &def.capabilities().constraints {
                        constraint.check(operation, &payload, &mut violations);
                    }
                }
            } else {
                violations.push(Violation::new("payload", "must be a JSON object"));
            }
        }

        let command = match (operation, definition, aggregate_id, request_id) {
            (Some(operation), Some(def), Some(aggregate_id), Some(request_id))
                if violations.is_empty() =>
            {
                Some(
                    Command::builder()
                        .operation(operation)
                        .aggregate_type(def.config().name())
                        .aggregate_id(aggregate_id)
                        .request_id(request_id)
                        .payload(payload)
                        .build(),
                )
            }
            _ => None,
        };

        ValidationResult {
            violations,
            command,
        }
    }
}

/// 缺失字段的违例：类型不符与未提供分开报告
fn absent(raw: &RawCommand, field: &'static str) -> Violation {
    if raw.mistyped.contains(&field) {
        Violation::new(field, "must be a string")
    } else {
        Violation::new(field, "is required")
    }
}

fn required_id<T>(
    raw: &RawCommand,
    field: &'static str,
    value: &Option<String>,
    out: &mut Vec<Violation>,
) -> Option<T>
where
    T: From<String> + ValueObject<Error = &'static str>,
{
    let Some(value) = value else {
        out.push(absent(raw, field));
        return None;
    };
    let id = T::from(value.clone());
    match id.validate() {
        Ok(()) => Some(id),
        Err(reason) => {
            out.push(Violation::new(field, reason));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AggregateDefinition, AggregateTypeConfig, TopicNaming};
    use serde_json::json;

    fn validator() -> CommandValidator {
        let mut registry = AggregateRegistry::new();
        registry
            .register(
                AggregateDefinition::new(AggregateTypeConfig::derive(
                    "pet",
                    &TopicNaming::default(),
                ))
                .constraint(PayloadConstraint::required("name"))
                .constraint(PayloadConstraint::of_kind("name", JsonKind::String))
                .constraint(PayloadConstraint::max_length("name", 8))
                .constraint(PayloadConstraint::one_of(
                    "owner.kind",
                    [json!("person"), json!("shelter")],
                ))
                .constraint(PayloadConstraint::Custom("age must not be negative", |p| {
                    p.get("age").and_then(Value::as_i64).is_none_or(|a| a >= 0)
                })),
            )
            .unwrap();
        CommandValidator::new(Arc::new(registry))
    }

    fn raw(operation: &str, payload: Value) -> RawCommand {
        RawCommand {
            operation: Some(operation.into()),
            aggregate_type: Some("pet".into()),
            aggregate_id: Some("p1".into()),
            request_id: Some("r1".into()),
            payload: Some(payload),
            mistyped: Vec::new(),
        }
    }

    #[test]
    fn valid_create_produces_command() {
        let result = validator().validate(&raw("create", json!({"name": "Rex"})));
        assert!(result.is_valid());
        let command = result.into_command().unwrap();
        assert_eq!(command.operation(), Operation::Create);
        assert_eq!(command.aggregate_id().as_str(), "p1");
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let result = validator().validate(&RawCommand::default());
        let fields: Vec<_> = result.violations().iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            ["requestId", "aggregateId", "operation", "aggregateType"]
        );
        assert!(result.into_command().is_err());
    }

    #[test]
    fn mistyped_fields_are_reported_as_type_violations() {
        let mut command = raw("create", json!({"name": "Rex"}));
        command.aggregate_id = None;
        command.mistyped = vec!["aggregateId"];
        let result = validator().validate(&command);
        assert_eq!(result.reason(), "aggregateId: must be a string");
        assert!(result.into_command().is_err());
    }

    #[test]
    fn unknown_operation_and_type_are_rejected() {
        let mut command = raw("upsert", json!({"name": "Rex"}));
        command.aggregate_type = Some("ghost".into());
        let result = validator().validate(&command);
        assert_eq!(
            result.reason(),
            "operation: unknown operation \"upsert\"; aggregateType: unknown aggregate type \"ghost\""
        );
    }

    #[test]
    fn declared_constraints_are_enforced_on_create() {
        let result = validator().validate(&raw(
            "create",
            json!({"name": "Maximilian", "owner": {"kind": "robot"}, "age": -1}),
        ));
        assert_eq!(
            result.reason(),
            "name: must be at most 8 long; owner.kind: must be one of [\"person\", \"shelter\"]; payload: age must not be negative"
        );

        let result = validator().validate(&raw("create", json!({})));
        assert_eq!(result.reason(), "name: is required");
    }

    #[test]
    fn update_payload_may_be_partial() {
        assert!(validator().validate(&raw("update", json!({"age": 3}))).is_valid());
        let result = validator().validate(&raw("update", json!({"name": 7})));
        assert_eq!(result.reason(), "name: must be a string");
    }

    #[test]
    fn delete_skips_payload_checks() {
        assert!(validator().validate(&raw("delete", Value::Null)).is_valid());
        let result = validator().validate(&raw("update", json!("Rex")));
        assert_eq!(result.reason(), "payload: must be a JSON object");
    }

    #[test]
    fn blank_ids_are_rejected() {
        let mut command = raw("create", json!({"name": "Rex"}));
        command.request_id = Some("   ".into());
        let result = validator().validate(&command);
        assert_eq!(result.reason(), "requestId: must not be blank");
    }
}
