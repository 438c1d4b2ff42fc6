//! 事件分发（EventDispatcher）
//!
//! 订阅已注册聚合类型的事件主题，按处理器匹配分发并发执行：
//! - 每个处理器按 `(aggregateId, version)` 去重，重投时已成功的处理器不再执行；
//! - 全部处理器成功后确认，任一失败则要求重投，仅重跑失败的处理器；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::{Delivery, EventBus, EventHandler, HandledAggregateType};
use crate::engine::EngineHandle;
use crate::error::DomainResult;
use crate::idempotency::BoundedWindow;
use crate::model::{AggregateId, Event};
use crate::registry::AggregateRegistry;
use crate::value_object::Version;
use bon::Builder;
use futures_core::stream::BoxStream;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::{StreamExt, stream};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::event_dispatcher_builder::{IsUnset, SetHandlers, State as BuilderState};

#[derive(Builder)]
pub struct EventDispatcher {
    event_bus: Arc<dyn EventBus>,
    registry: Arc<AggregateRegistry>,
    #[builder(setters(vis = "pub(crate)"))]
    handlers: HandlerRegistry,
    /// 单个事件的处理并发（同一事件广播给多个 handler）
    #[builder(default = 8)]
    handler_concurrency: usize,
    /// 去重窗口容量
    #[builder(default = 4096)]
    dedup_capacity: usize,
}

impl<S: BuilderState> EventDispatcherBuilder<S> {
    pub fn event_handlers(
        self,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> EventDispatcherBuilder<SetHandlers<S>>
    where
        <S as BuilderState>::Handlers: IsUnset,
    {
        self.handlers(HandlerRegistry::new(handlers))
    }
}

/// 已成功处理的 `(handler, aggregateId, version)`
type SeenEvents = BoundedWindow<(String, AggregateId, Version), ()>;

type HandlerRun = BoxFuture<'static, (String, anyhow::Result<()>)>;

impl EventDispatcher {
    /// 为每个有处理器订阅的聚合类型启动一个分发循环
    pub async fn start(self: Arc<Self>) -> DomainResult<EngineHandle> {
        let mut handle = EngineHandle::new(CancellationToken::new());

        for definition in self.registry.iter() {
            let config = definition.config();
            let handlers = self.handlers.matching(config.name());
            if handlers.is_empty() {
                continue;
            }

            let stream = self.event_bus.subscribe(config.event_topic()).await?;
            info!(
                aggregate_type = config.name(),
                topic = config.event_topic(),
                handlers = handlers.len(),
                "event dispatcher subscribed"
            );
            handle.spawn(Self::dispatch_loop(
                self.clone(),
                handle.token(),
                handlers,
                stream,
            ));
        }

        Ok(handle)
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        token: CancellationToken,
        handlers: Vec<Arc<dyn EventHandler>>,
        mut stream: BoxStream<'static, DomainResult<Delivery>>,
    ) {
        // 容量按处理器数放大，保证每个处理器的窗口大小一致
        let mut seen = SeenEvents::new(self.dedup_capacity.saturating_mul(handlers.len().max(1)));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.dispatch(&handlers, &mut seen, delivery).await,
                    Some(Err(err)) => warn!(error = %err, "event stream error"),
                    None => break,
                }
            }
        }
    }

    /// 只运行尚未成功处理该事件的处理器；重投时已成功的处理器不再执行
    async fn dispatch(
        &self,
        handlers: &[Arc<dyn EventHandler>],
        seen: &mut SeenEvents,
        delivery: Delivery,
    ) {
        let event = match Event::from_message(delivery.message()) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "undecodable event dropped");
                settle(delivery, true).await;
                return;
            }
        };

        let key_for = |name: &str| {
            (
                name.to_string(),
                event.aggregate_id().clone(),
                event.version(),
            )
        };
        let pending: Vec<Arc<dyn EventHandler>> = handlers
            .iter()
            .filter(|h| !seen.contains(&key_for(h.handler_name())))
            .cloned()
            .collect();

        if pending.is_empty() {
            debug!(
                aggregate_id = %event.aggregate_id(),
                version = event.version().value(),
                "redelivered event skipped"
            );
            settle(delivery, true).await;
            return;
        }

        let runs: Vec<HandlerRun> = pending
            .into_iter()
            .map(|h: Arc<dyn EventHandler>| {
                let ev = event.clone();
                async move {
                    let result = h.handle(&ev).await;
                    (h.handler_name().to_string(), result)
                }
                .boxed()
            })
            .collect();

        let results: Vec<(String, anyhow::Result<()>)> = stream::iter(runs)
            .buffer_unordered(self.handler_concurrency.max(1))
            .collect()
            .await;

        let mut failed = false;
        for (handler, result) in results {
            match result {
                Ok(()) => seen.insert(key_for(&handler), ()),
                Err(err) => {
                    failed = true;
                    warn!(
                        handler = %handler,
                        aggregate_id = %event.aggregate_id(),
                        version = event.version().value(),
                        error = %err,
                        "event handler failed"
                    );
                }
            }
        }

        settle(delivery, !failed).await;
    }
}

async fn settle(delivery: Delivery, ok: bool) {
    let result = if ok {
        delivery.ack().await
    } else {
        delivery.nack().await
    };
    if let Err(err) = result {
        warn!(error = %err, "failed to settle event delivery");
    }
}

#[derive(Clone, Default)]
struct HandlerRegistry {
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let mut by_type: HashMap<String, Vec<Arc<dyn EventHandler>>> = HashMap::new();
        let mut all: Vec<Arc<dyn EventHandler>> = Vec::new();

        for h in handlers {
            match h.handled_aggregate_type() {
                HandledAggregateType::All => all.push(h),
                HandledAggregateType::One(t) => {
                    by_type.entry(t).or_default().push(h);
                }
                HandledAggregateType::Many(ts) => {
                    for t in ts {
                        by_type.entry(t).or_default().push(h.clone());
                    }
                }
            }
        }

        Self { by_type, all }
    }

    fn matching(&self, aggregate_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut merged: Vec<Arc<dyn EventHandler>> = Vec::new();
        if let Some(list) = self.by_type.get(aggregate_type) {
            merged.extend(list.iter().cloned());
        }
        merged.extend(self.all.iter().cloned());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::InMemoryEventBus;
    use crate::model::{Command, Operation};
    use crate::registry::{AggregateDefinition, AggregateTypeConfig, TopicNaming};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SpyHandler {
        name: &'static str,
        types: HandledAggregateType,
        fail_first: AtomicUsize,
        handled: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl EventHandler for SpyHandler {
        fn handler_name(&self) -> &str {
            self.name
        }
        fn handled_aggregate_type(&self) -> HandledAggregateType {
            self.types.clone()
        }
        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("fail requested");
            }
            self.handled.lock().unwrap().push(event.version().value());
            Ok(())
        }
    }

    fn spy(name: &'static str, types: HandledAggregateType, fail_first: usize) -> Arc<SpyHandler> {
        Arc::new(SpyHandler {
            name,
            types,
            fail_first: AtomicUsize::new(fail_first),
            handled: Mutex::new(Vec::new()),
        })
    }

    fn event(version: u64) -> Event {
        let command = Command::builder()
            .operation(Operation::Update)
            .aggregate_type("pet")
            .aggregate_id("p1")
            .request_id(format!("r{version}"))
            .build();
        Event::from_command(&command, Version::from_value(version), json!({}))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn redelivery_reruns_only_the_failed_handler() {
        let naming = TopicNaming::default();
        let pet = AggregateTypeConfig::derive("pet", &naming);
        let mut registry = AggregateRegistry::new();
        registry.register(AggregateDefinition::new(pet.clone())).unwrap();
        registry
            .register(AggregateDefinition::new(AggregateTypeConfig::derive("owner", &naming)))
            .unwrap();

        let bus = Arc::new(InMemoryEventBus::default());
        let flaky = spy("flaky", HandledAggregateType::One("pet".into()), 1);
        let audit = spy("audit", HandledAggregateType::All, 0);

        let dispatcher = Arc::new(
            EventDispatcher::builder()
                .event_bus(bus.clone())
                .registry(Arc::new(registry))
                .event_handlers(vec![
                    flaky.clone() as Arc<dyn EventHandler>,
                    audit.clone() as Arc<dyn EventHandler>,
                ])
                .build(),
        );
        let handle = dispatcher.start().await.unwrap();

        let first = event(1).to_message().unwrap();
        bus.publish(pet.event_topic(), &first).await.unwrap();
        bus.publish(pet.event_topic(), &event(2).to_message().unwrap())
            .await
            .unwrap();

        // 使用 timeout + 条件轮询，减少固定 sleep 的脆弱性
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if bus.acked(pet.event_topic()) >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await;

        let mut flaky_seen = flaky.handled.lock().unwrap().clone();
        flaky_seen.sort();
        assert_eq!(flaky_seen, [1, 2]);
        assert_eq!(bus.nacked(pet.event_topic()), 1);
        // 重投只重跑失败的处理器
        let mut audit_seen = audit.handled.lock().unwrap().clone();
        audit_seen.sort();
        assert_eq!(audit_seen, [1, 2]);
    }
}
