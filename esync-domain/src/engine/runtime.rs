//! 引擎运行时
//!
//! 编排长驻任务：
//! - 每个命令主题一个订阅，由 `worker_concurrency` 个消费任务共享（竞争消费）；
//! - 每个任务一次处理一条命令直至终态，再确认投递并取下一条；
//! - 周期对账任务补发未发布事件；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::{EngineHandle, SyncEngine};
use crate::error::DomainResult;
use crate::eventing::Delivery;
use crate::model::RawCommand;
use crate::value_object::ValueObject;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type SharedDeliveries = Arc<AsyncMutex<BoxStream<'static, DomainResult<Delivery>>>>;

impl SyncEngine {
    /// 订阅全部命令主题并启动消费与对账任务
    ///
    /// 订阅在返回前完成，此后发布到命令主题的消息不会丢失。
    pub async fn start(self: Arc<Self>) -> DomainResult<EngineHandle> {
        self.config.validate()?;
        let mut handle = EngineHandle::new(CancellationToken::new());

        for definition in self.registry.iter() {
            let config = definition.config();
            let deliveries: SharedDeliveries = Arc::new(AsyncMutex::new(
                self.event_bus.subscribe(config.command_topic()).await?,
            ));
            for worker in 0..self.config.worker_concurrency {
                handle.spawn(Self::worker_loop(
                    self.clone(),
                    handle.token(),
                    deliveries.clone(),
                    worker,
                ));
            }
            info!(
                aggregate_type = config.name(),
                topic = config.command_topic(),
                workers = self.config.worker_concurrency,
                "command workers started"
            );
        }

        let engine = self.clone();
        handle.spawn(spawn_periodic(
            handle.token(),
            self.config.reconcile_interval,
            move || {
                let engine = engine.clone();
                async move {
                    engine.reconcile_once().await;
                }
            },
        ));

        Ok(handle)
    }

    async fn worker_loop(
        self: Arc<Self>,
        token: CancellationToken,
        deliveries: SharedDeliveries,
        worker: usize,
    ) {
        loop {
            // 仅在命令之间检查取消：已开始处理的命令总会走到终态
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = async { deliveries.lock().await.next().await } => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                Some(Err(err)) => warn!(worker, error = %err, "command stream error"),
                None => break,
            }
        }
        debug!(worker, "command worker stopped");
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        match RawCommand::from_message(delivery.message()) {
            Ok(raw) => {
                let outcome = self.process(raw).await;
                debug!(
                    state = outcome.state.as_str(),
                    attempts = outcome.attempts,
                    redelivery = delivery.is_redelivery(),
                    "command finished"
                );
            }
            Err(err) => warn!(error = %err, "command message is not a JSON object, dropped"),
        }
        if let Err(err) = delivery.ack().await {
            warn!(error = %err, "failed to acknowledge command delivery");
        }
    }
}

fn spawn_periodic<F, Fut>(
    token: CancellationToken,
    interval: Duration,
    mut f: F,
) -> impl Future<Output = ()> + Send + 'static
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    }
}
