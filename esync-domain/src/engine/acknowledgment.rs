//! 回执发送（AcknowledgmentEmitter）
//!
//! 将命令的接受/拒绝结果发布到回复主题，按请求 ID 路由。
//! 仅有副作用：发送失败只记录日志，不回滚已提交的事件。
//!
use crate::eventing::EventBus;
use crate::model::Acknowledgment;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[async_trait]
pub trait AcknowledgmentEmitter: Send + Sync {
    async fn emit(&self, ack: &Acknowledgment);
}

/// 发布到总线回复主题
pub struct BusAcknowledgmentEmitter {
    event_bus: Arc<dyn EventBus>,
    reply_topic: String,
}

impl BusAcknowledgmentEmitter {
    pub fn new(event_bus: Arc<dyn EventBus>, reply_topic: impl Into<String>) -> Self {
        Self {
            event_bus,
            reply_topic: reply_topic.into(),
        }
    }
}

#[async_trait]
impl AcknowledgmentEmitter for BusAcknowledgmentEmitter {
    async fn emit(&self, ack: &Acknowledgment) {
        let message = match ack.to_message() {
            Ok(message) => message,
            Err(err) => {
                warn!(request_id = %ack.request_id, error = %err, "failed to encode acknowledgment");
                return;
            }
        };
        match self.event_bus.publish(&self.reply_topic, &message).await {
            Ok(_) => debug!(
                request_id = %ack.request_id,
                accepted = ack.accepted,
                "acknowledgment emitted"
            ),
            Err(err) => warn!(
                request_id = %ack.request_id,
                error = %err,
                "failed to emit acknowledgment"
            ),
        }
    }
}

/// 记录所有回执（测试用）
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    emitted: Mutex<Vec<Acknowledgment>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<Acknowledgment> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AcknowledgmentEmitter for RecordingEmitter {
    async fn emit(&self, ack: &Acknowledgment) {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ack.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::InMemoryEventBus;
    use crate::model::RequestId;
    use crate::value_object::Version;

    #[tokio::test]
    async fn bus_emitter_publishes_to_reply_topic() {
        let bus = Arc::new(InMemoryEventBus::default());
        let emitter = BusAcknowledgmentEmitter::new(bus.clone(), "replies");

        emitter
            .emit(&Acknowledgment::accepted(
                RequestId::from("r1"),
                Version::from_value(1),
            ))
            .await;

        let published = bus.published("replies");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].partition_key(), Some("r1"));
        let ack = Acknowledgment::from_message(&published[0]).unwrap();
        assert!(ack.accepted);
    }

    #[tokio::test]
    async fn emit_failures_are_swallowed() {
        let bus = Arc::new(InMemoryEventBus::default());
        bus.fail_next_publishes("replies", 1);
        let emitter = BusAcknowledgmentEmitter::new(bus.clone(), "replies");

        emitter
            .emit(&Acknowledgment::rejected(RequestId::from("r1"), "bad"))
            .await;
        assert!(bus.published("replies").is_empty());
    }
}
