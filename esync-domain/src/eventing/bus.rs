//! 事件总线（EventBus）协议
//!
//! 按主题发布与订阅消息。发布带幂等键时，总线保证同一键只投递一次；
//! 订阅返回 'static 生命周期的投递流，便于在 tokio::spawn 中消费，
//! 每条投递需在处理到终态后显式确认（ack）或要求重投（nack）。
//!
use super::{BusMessage, Delivery};
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use futures_core::stream::BoxStream;

/// 发布回执
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishReceipt {
    /// 新消息，已投递
    Published,
    /// 幂等键已发布过，本次未投递
    Duplicate,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<PublishReceipt>;

    async fn publish_batch(
        &self,
        topic: &str,
        messages: &[BusMessage],
    ) -> Result<Vec<PublishReceipt>> {
        let mut receipts = Vec::with_capacity(messages.len());
        for message in messages {
            receipts.push(self.publish(topic, message).await?);
        }
        Ok(receipts)
    }

    /// 订阅主题；仅接收订阅之后发布的消息
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Result<Delivery>>>;
}
