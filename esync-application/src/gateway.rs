//! 命令网关（CommandGateway）
//!
//! 生产方入口：把命令发布到其聚合类型的命令主题，并在回复主题上按请求 ID
//! 等待回执。同一请求 ID 可有多个等待者（例如客户端重试），回执到达时全部唤醒。
//!
use crate::error::AppError;
use dashmap::DashMap;
use esync_domain::eventing::EventBus;
use esync_domain::model::{Acknowledgment, Command, RequestId};
use esync_domain::registry::{AggregateRegistry, TopicNaming};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 等待回执的上限
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
        }
    }
}

type PendingReplies = DashMap<RequestId, Vec<oneshot::Sender<Acknowledgment>>>;

pub struct CommandGateway {
    event_bus: Arc<dyn EventBus>,
    registry: Arc<AggregateRegistry>,
    pending: Arc<PendingReplies>,
    config: GatewayConfig,
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl CommandGateway {
    /// 订阅回复主题并启动回执路由任务
    pub async fn connect(
        event_bus: Arc<dyn EventBus>,
        registry: Arc<AggregateRegistry>,
        topics: &TopicNaming,
        config: GatewayConfig,
    ) -> Result<Self, AppError> {
        let mut replies = event_bus.subscribe(&topics.reply_topic()).await?;
        let pending: Arc<PendingReplies> = Arc::new(DashMap::new());
        let token = CancellationToken::new();

        let listener = tokio::spawn({
            let pending = pending.clone();
            let token = token.clone();
            async move {
                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => break,
                        next = replies.next() => next,
                    };
                    let delivery = match next {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(err)) => {
                            warn!(error = %err, "reply stream error");
                            continue;
                        }
                        None => break,
                    };

                    match Acknowledgment::from_message(delivery.message()) {
                        Ok(ack) => route(&pending, ack),
                        Err(err) => warn!(error = %err, "undecodable reply dropped"),
                    }
                    if let Err(err) = delivery.ack().await {
                        warn!(error = %err, "failed to acknowledge reply delivery");
                    }
                }
                // 关闭后唤醒所有等待者
                pending.clear();
            }
        });

        Ok(Self {
            event_bus,
            registry,
            pending,
            config,
            token,
            listener,
        })
    }

    /// 发布命令并等待其回执
    ///
    /// 拒绝也作为回执正常返回；只有发布失败、超时或网关关闭才返回错误。
    #[tracing::instrument(
        skip_all,
        fields(
            aggregate_type = command.aggregate_type(),
            aggregate_id = %command.aggregate_id(),
            request_id = %command.request_id(),
        )
    )]
    pub async fn submit(&self, command: &Command) -> Result<Acknowledgment, AppError> {
        let config = self.registry.config(command.aggregate_type())?;
        let request_id = command.request_id().clone();

        // 先登记再发布，回执不会早于等待者到达
        let (tx, rx) = oneshot::channel();
        self.pending.entry(request_id.clone()).or_default().push(tx);

        let published = match command.to_message() {
            Ok(message) => self.event_bus.publish(config.command_topic(), &message).await,
            Err(err) => Err(err),
        };
        if let Err(err) = published {
            drop(rx);
            self.forget(&request_id);
            return Err(err.into());
        }
        debug!("command published, awaiting reply");

        let reply = tokio::time::timeout(self.config.reply_timeout, rx).await;
        match reply {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(AppError::Closed(request_id)),
            Err(_) => {
                self.forget(&request_id);
                Err(AppError::ReplyTimeout {
                    request_id,
                    after_ms: self.config.reply_timeout.as_millis(),
                })
            }
        }
    }

    /// 发布命令，未被接受时返回 `AppError::Rejected`
    pub async fn execute(&self, command: &Command) -> Result<Acknowledgment, AppError> {
        let ack = self.submit(command).await?;
        if ack.accepted {
            Ok(ack)
        } else {
            Err(AppError::Rejected {
                request_id: ack.request_id,
                reason: ack.reason.unwrap_or_default(),
            })
        }
    }

    /// 仍在等待回执的请求数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn registry(&self) -> &Arc<AggregateRegistry> {
        &self.registry
    }

    /// 停止回执路由并等待路由任务退出
    pub async fn close(mut self) {
        self.token.cancel();
        if let Err(err) = (&mut self.listener).await {
            warn!(error = %err, "reply listener ended abnormally");
        }
    }

    /// 移除已放弃的等待者
    fn forget(&self, request_id: &RequestId) {
        if let Some(mut waiters) = self.pending.get_mut(request_id) {
            waiters.retain(|tx| !tx.is_closed());
        }
        self.pending.remove_if(request_id, |_, waiters| waiters.is_empty());
    }
}

impl Drop for CommandGateway {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn route(pending: &PendingReplies, ack: Acknowledgment) {
    let Some((_, waiters)) = pending.remove(&ack.request_id) else {
        debug!(request_id = %ack.request_id, "reply without waiter");
        return;
    };
    for tx in waiters {
        let _ = tx.send(ack.clone());
    }
}
