//! 内存版事件总线（InMemoryEventBus）
//!
//! 基于 `tokio::sync::broadcast` 的按主题总线，满足 `EventBus` 协议：
//! - `publish`：按幂等键去重后广播，并保留每个主题的发布日志供检查；
//! - `subscribe`：返回 `'static` 投递流，`nack` 会将消息重新广播（投递次数加 1）；
//! - 支持按主题注入发布失败；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：无订阅者时消息仅写入日志，不会为之后的订阅者补发。
//!
use super::{Acknowledger, BusMessage, Delivery, EventBus, IdempotencyKey, PublishReceipt};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone, Debug)]
struct Envelope {
    message: BusMessage,
    attempt: u32,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    log: Vec<BusMessage>,
    seen_keys: HashSet<IdempotencyKey>,
    acked: usize,
    nacked: usize,
}

struct Inner {
    capacity: usize,
    topics: Mutex<HashMap<String, Topic>>,
    failing: Mutex<HashMap<String, usize>>,
}

impl Inner {
    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_topic<R>(&self, name: &str, f: impl FnOnce(&mut Topic) -> R) -> R {
        let mut topics = self.topics();
        let topic = topics.entry(name.to_string()).or_insert_with(|| Topic {
            tx: broadcast::channel(self.capacity).0,
            log: Vec::new(),
            seen_keys: HashSet::new(),
            acked: 0,
            nacked: 0,
        });
        f(topic)
    }
}

/// 简单的内存事件总线实现
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryEventBus {
    /// 创建一个内存总线，`capacity` 为每个主题的广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// 对 `topic` 接下来的 `n` 次发布返回错误
    pub fn fail_next_publishes(&self, topic: &str, n: usize) {
        self.inner
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), n);
    }

    /// 主题上实际投递过的消息（不含重复键与重投）
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.inner
            .topics()
            .get(topic)
            .map(|t| t.log.clone())
            .unwrap_or_default()
    }

    pub fn acked(&self, topic: &str) -> usize {
        self.inner.topics().get(topic).map_or(0, |t| t.acked)
    }

    pub fn nacked(&self, topic: &str) -> usize {
        self.inner.topics().get(topic).map_or(0, |t| t.nacked)
    }

    fn take_injected_failure(&self, topic: &str) -> bool {
        let mut failing = self
            .inner
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match failing.get_mut(topic) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<PublishReceipt> {
        if self.take_injected_failure(topic) {
            return Err(DomainError::event_bus(format!(
                "injected publish failure on {topic}"
            )));
        }

        Ok(self.inner.with_topic(topic, |t| {
            if let Some(key) = message.dedup_key() {
                if !t.seen_keys.insert(key.clone()) {
                    return PublishReceipt::Duplicate;
                }
            }
            t.log.push(message.clone());
            // 无订阅者时 send 返回错误，消息已写入日志，视为非致命并忽略
            let _ = t.tx.send(Envelope {
                message: message.clone(),
                attempt: 1,
            });
            PublishReceipt::Published
        }))
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Result<Delivery>>> {
        let rx = self.inner.with_topic(topic, |t| t.tx.subscribe());
        let inner = self.inner.clone();
        let topic = topic.to_string();

        let stream = BroadcastStream::new(rx).map(move |received| {
            let envelope = received.map_err(|e| DomainError::event_bus(e.to_string()))?;
            let acker = InMemoryAcker {
                inner: inner.clone(),
                topic: topic.clone(),
                envelope: envelope.clone(),
            };
            Ok(Delivery::new(
                envelope.message,
                envelope.attempt,
                Arc::new(acker),
            ))
        });
        Ok(Box::pin(stream))
    }
}

struct InMemoryAcker {
    inner: Arc<Inner>,
    topic: String,
    envelope: Envelope,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.inner.with_topic(&self.topic, |t| t.acked += 1);
        Ok(())
    }

    async fn nack(&self) -> Result<()> {
        self.inner.with_topic(&self.topic, |t| {
            t.nacked += 1;
            let _ = t.tx.send(Envelope {
                message: self.envelope.message.clone(),
                attempt: self.envelope.attempt + 1,
            });
        });
        Ok(())
    }
}
