//! 事件处理器（EventHandler）
//!
//! 定义消费某类/多类/全部聚合事件的处理逻辑与元信息（名称、订阅的聚合类型）。
//!
use crate::model::Event;
use async_trait::async_trait;

#[derive(Clone, Debug)]
pub enum HandledAggregateType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledAggregateType {
    pub fn matches(&self, aggregate_type: &str) -> bool {
        match self {
            HandledAggregateType::One(t) => t == aggregate_type,
            HandledAggregateType::Many(ts) => ts.iter().any(|t| t == aggregate_type),
            HandledAggregateType::All => true,
        }
    }
}

/// 事件处理器：处理某些聚合类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与审计）
    fn handler_name(&self) -> &str;
    /// 返回该处理器订阅的聚合类型
    fn handled_aggregate_type(&self) -> HandledAggregateType;
    /// 处理事件；返回错误时该事件会被重投
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}
