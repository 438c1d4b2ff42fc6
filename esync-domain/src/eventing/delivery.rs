use super::BusMessage;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// 投递确认：由总线实现提供
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// 处理完成，不再投递
    async fn ack(&self) -> Result<()>;

    /// 处理失败，请求重投
    async fn nack(&self) -> Result<()>;
}

/// 一次投递：消息 + 投递次数 + 确认句柄
pub struct Delivery {
    message: BusMessage,
    attempt: u32,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: BusMessage, attempt: u32, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    pub fn message(&self) -> &BusMessage {
        &self.message
    }

    /// 第几次投递（从 1 开始）
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.acker.nack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
