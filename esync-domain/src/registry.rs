//! 聚合类型注册表
//!
//! 每个聚合类型在启动时以显式配置记录注册：命令/事件主题名与快照/事件集合名
//! 按约定由类型名派生，可逐项覆盖。类型相关的校验与状态派生以纯函数能力表挂载。
//! 注册完成后以 `Arc` 冻结，交由引擎只读使用。
//!
use crate::error::{DomainError, DomainResult};
use crate::model::Command;
use crate::validation::PayloadConstraint;
use crate::value_object::ValueObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 主题命名约定：`<scheme>://<namespace>/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TopicNaming {
    pub scheme: String,
    pub namespace: String,
    pub reply_topic: String,
}

impl Default for TopicNaming {
    fn default() -> Self {
        Self {
            scheme: "persistent".to_string(),
            namespace: "public/default".to_string(),
            reply_topic: "command-replies".to_string(),
        }
    }
}

impl TopicNaming {
    fn qualify(&self, name: &str) -> String {
        format!("{}://{}/{}", self.scheme, self.namespace, name)
    }

    pub fn command_topic(&self, aggregate_type: &str) -> String {
        self.qualify(&format!("{aggregate_type}-commands"))
    }

    pub fn event_topic(&self, aggregate_type: &str) -> String {
        self.qualify(&format!("{aggregate_type}-events"))
    }

    pub fn reply_topic(&self) -> String {
        self.qualify(&self.reply_topic)
    }
}

impl ValueObject for TopicNaming {
    type Error = DomainError;

    fn validate(&self) -> Result<(), Self::Error> {
        let parts = [
            ("scheme", &self.scheme),
            ("namespace", &self.namespace),
            ("reply_topic", &self.reply_topic),
        ];
        for (name, value) in parts {
            if value.trim().is_empty() || value.chars().any(char::is_whitespace) {
                return Err(DomainError::Validation {
                    reason: format!("topic naming {name} must be non-empty without whitespace"),
                });
            }
        }
        Ok(())
    }
}

/// 单个聚合类型的配置记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTypeConfig {
    name: String,
    command_topic: String,
    event_topic: String,
    aggregate_collection: String,
    event_collection: String,
}

impl AggregateTypeConfig {
    /// 按命名约定派生：集合名为 `<type>` 与 `<type>_events`（`-` 替换为 `_`）
    pub fn derive(name: impl Into<String>, naming: &TopicNaming) -> Self {
        let name = name.into();
        let collection = name.replace('-', "_");
        Self {
            command_topic: naming.command_topic(&name),
            event_topic: naming.event_topic(&name),
            event_collection: format!("{collection}_events"),
            aggregate_collection: collection,
            name,
        }
    }

    pub fn with_command_topic(mut self, topic: impl Into<String>) -> Self {
        self.command_topic = topic.into();
        self
    }

    pub fn with_event_topic(mut self, topic: impl Into<String>) -> Self {
        self.event_topic = topic.into();
        self
    }

    pub fn with_aggregate_collection(mut self, collection: impl Into<String>) -> Self {
        self.aggregate_collection = collection.into();
        self
    }

    pub fn with_event_collection(mut self, collection: impl Into<String>) -> Self {
        self.event_collection = collection.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    pub fn event_topic(&self) -> &str {
        &self.event_topic
    }

    pub fn aggregate_collection(&self) -> &str {
        &self.aggregate_collection
    }

    pub fn event_collection(&self) -> &str {
        &self.event_collection
    }
}

impl ValueObject for AggregateTypeConfig {
    type Error = DomainError;

    fn validate(&self) -> Result<(), Self::Error> {
        let invalid = |reason: String| Err(DomainError::Validation { reason });

        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return invalid(format!("invalid aggregate type name: {:?}", self.name));
        }
        for collection in [&self.aggregate_collection, &self.event_collection] {
            if !is_identifier(collection) {
                return invalid(format!("invalid collection name: {collection:?}"));
            }
        }
        if self.aggregate_collection == self.event_collection {
            return invalid(format!(
                "aggregate and event collections must differ: {}",
                self.event_collection
            ));
        }
        for topic in [&self.command_topic, &self.event_topic] {
            if topic.trim().is_empty() {
                return invalid(format!("empty topic for aggregate type {}", self.name));
            }
        }
        if self.command_topic == self.event_topic {
            return invalid(format!(
                "command and event topics must differ: {}",
                self.event_topic
            ));
        }
        Ok(())
    }
}

// 集合名会拼入 SQL 表名，仅允许 [A-Za-z_][A-Za-z0-9_]*
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 状态派生函数：`(prior_state, command) -> new_state`
pub type DeriveFn = fn(&Value, &Command) -> Value;

/// 类型相关的纯函数能力
#[derive(Debug, Clone, Default)]
pub struct AggregateCapabilities {
    pub constraints: Vec<PayloadConstraint>,
    pub derive: Option<DeriveFn>,
}

/// 注册单元：配置记录 + 能力表
#[derive(Debug, Clone)]
pub struct AggregateDefinition {
    config: AggregateTypeConfig,
    capabilities: AggregateCapabilities,
}

impl AggregateDefinition {
    pub fn new(config: AggregateTypeConfig) -> Self {
        Self {
            config,
            capabilities: AggregateCapabilities::default(),
        }
    }

    pub fn constraint(mut self, constraint: PayloadConstraint) -> Self {
        self.capabilities.constraints.push(constraint);
        self
    }

    pub fn constraints(mut self, constraints: impl IntoIterator<Item = PayloadConstraint>) -> Self {
        self.capabilities.constraints.extend(constraints);
        self
    }

    pub fn derive(mut self, derive: DeriveFn) -> Self {
        self.capabilities.derive = Some(derive);
        self
    }

    pub fn config(&self) -> &AggregateTypeConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &AggregateCapabilities {
        &self.capabilities
    }
}

/// 聚合类型注册表（启动期构建，之后只读）
#[derive(Debug, Clone, Default)]
pub struct AggregateRegistry {
    definitions: BTreeMap<String, Arc<AggregateDefinition>>,
}

impl AggregateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册聚合类型；名称、主题或集合重复时拒绝
    pub fn register(&mut self, definition: AggregateDefinition) -> DomainResult<()> {
        let config = definition.config();
        config.validate()?;

        if self.definitions.contains_key(config.name()) {
            return Err(DomainError::Validation {
                reason: format!("aggregate type already registered: {}", config.name()),
            });
        }
        for existing in self.definitions.values().map(|d| d.config()) {
            let clash = [config.command_topic(), config.event_topic()]
                .iter()
                .any(|t| *t == existing.command_topic() || *t == existing.event_topic())
                || [config.aggregate_collection(), config.event_collection()]
                    .iter()
                    .any(|c| {
                        *c == existing.aggregate_collection() || *c == existing.event_collection()
                    });
            if clash {
                return Err(DomainError::Validation {
                    reason: format!(
                        "aggregate type {} shares a topic or collection with {}",
                        config.name(),
                        existing.name()
                    ),
                });
            }
        }

        self.definitions
            .insert(config.name().to_string(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, aggregate_type: &str) -> Option<&Arc<AggregateDefinition>> {
        self.definitions.get(aggregate_type)
    }

    pub fn contains(&self, aggregate_type: &str) -> bool {
        self.definitions.contains_key(aggregate_type)
    }

    pub fn config(&self, aggregate_type: &str) -> DomainResult<&AggregateTypeConfig> {
        self.get(aggregate_type)
            .map(|d| d.config())
            .ok_or_else(|| DomainError::UnknownAggregateType(aggregate_type.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AggregateDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
