//! 同步引擎（SyncEngine）
//!
//! 将校验、幂等、版本解析与双写编排为原子的“命令 → 事件”流水线：
//! - 先提交存储（事实来源），再以 `(aggregateId, version)` 幂等键发布到总线；
//! - 同一聚合串行处理：从去重到发布全程持有聚合锁，退避等待期间释放；
//! - 发布总是按版本顺序冲刷该聚合所有未发布事件，保证总线上的聚合内顺序；
//! - 所有失败都落入终态并以结构化回执返回，不向调用方抛出错误。
//!
use super::acknowledgment::{AcknowledgmentEmitter, BusAcknowledgmentEmitter};
use super::locks::AggregateLocks;
use super::state::{CommandOutcome, ProcessingState};
use crate::config::EngineConfig;
use crate::error::{DomainError, DomainResult};
use crate::eventing::{EventBus, PublishReceipt};
use crate::idempotency::IdempotencyGuard;
use crate::model::{Acknowledgment, AggregateId, Command, Event, RawCommand, RequestId};
use crate::persist::AggregateStore;
use crate::registry::{AggregateDefinition, AggregateRegistry, AggregateTypeConfig};
use crate::validation::CommandValidator;
use crate::value_object::Version;
use crate::versioning::VersioningResolver;
use bon::bon;
use std::future::Future;
use std::sync::Arc;
use tracing::{Span, debug, info, warn};

/// 提交成功但发布重试耗尽时的拒绝原因
pub const PUBLISH_PENDING: &str = "event publish pending";

pub struct SyncEngine {
    pub(super) registry: Arc<AggregateRegistry>,
    pub(super) store: Arc<dyn AggregateStore>,
    pub(super) event_bus: Arc<dyn EventBus>,
    emitter: Arc<dyn AcknowledgmentEmitter>,
    validator: CommandValidator,
    guard: IdempotencyGuard,
    resolver: VersioningResolver,
    pub(super) locks: AggregateLocks,
    pub(super) config: EngineConfig,
}

#[bon]
impl SyncEngine {
    #[builder]
    pub fn new(
        registry: Arc<AggregateRegistry>,
        store: Arc<dyn AggregateStore>,
        event_bus: Arc<dyn EventBus>,
        // 缺省时发布到配置的回复主题
        emitter: Option<Arc<dyn AcknowledgmentEmitter>>,
        #[builder(default)] config: EngineConfig,
    ) -> Self {
        let emitter = emitter.unwrap_or_else(|| {
            Arc::new(BusAcknowledgmentEmitter::new(
                event_bus.clone(),
                config.topics.reply_topic(),
            )) as Arc<dyn AcknowledgmentEmitter>
        });
        Self {
            validator: CommandValidator::new(registry.clone()),
            guard: IdempotencyGuard::new(store.clone(), config.recent_requests_capacity),
            resolver: VersioningResolver,
            locks: AggregateLocks::new(),
            registry,
            store,
            event_bus,
            emitter,
            config,
        }
    }
}

/// 终态
struct Terminal {
    state: ProcessingState,
    version: Option<Version>,
    reason: Option<String>,
}

impl Terminal {
    fn new(state: ProcessingState, version: Option<Version>, reason: Option<String>) -> Self {
        Self {
            state,
            version,
            reason,
        }
    }
}

/// 持锁一次尝试的结果
enum Step {
    Done(Terminal),
    /// 可重试的失败（版本过期或存储故障），状态已记录
    Retry(String),
    Published(Version),
    PublishFailed(Version, DomainError),
}

impl Step {
    /// 存储故障：瞬时故障重试，其余直接落入 `StoreFailed`
    fn store_fault(err: DomainError) -> Self {
        if err.is_retryable() {
            Step::Retry(err.to_string())
        } else {
            Step::Done(Terminal::new(
                ProcessingState::StoreFailed,
                None,
                Some(err.to_string()),
            ))
        }
    }
}

/// 状态轨迹
struct Trace {
    path: Vec<ProcessingState>,
    attempts: u32,
}

impl Trace {
    fn new() -> Self {
        let mut trace = Self {
            path: Vec::with_capacity(8),
            attempts: 0,
        };
        trace.enter(ProcessingState::Received);
        trace
    }

    fn enter(&mut self, next: ProcessingState) {
        if let Some(prev) = self.path.last() {
            debug_assert!(
                prev.can_transition_to(next),
                "illegal transition {prev} -> {next}"
            );
        }
        debug!(target: "esync::engine", state = next.as_str(), "state transition");
        self.path.push(next);
    }

    fn current(&self) -> ProcessingState {
        self.path
            .last()
            .copied()
            .unwrap_or(ProcessingState::Received)
    }
}

impl SyncEngine {
    pub fn registry(&self) -> &Arc<AggregateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 处理一条原始命令直至终态，并发送回执
    #[tracing::instrument(
        skip_all,
        fields(
            aggregate_type = raw.aggregate_type.as_deref().unwrap_or_default(),
            aggregate_id = raw.aggregate_id.as_deref().unwrap_or_default(),
            request_id = raw.request_id.as_deref().unwrap_or_default(),
            version = tracing::field::Empty,
        )
    )]
    pub async fn process(&self, raw: RawCommand) -> CommandOutcome {
        let mut trace = Trace::new();
        trace.enter(ProcessingState::Validating);
        let request_id = raw.request_id();

        let validation = self.validator.validate(&raw);
        let terminal = match validation.into_command() {
            Err(violations) => {
                trace.enter(ProcessingState::Rejected);
                let reason = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                info!(reason = %reason, "command rejected");
                Terminal::new(ProcessingState::Rejected, None, Some(reason))
            }
            Ok(command) => match self.registry.get(command.aggregate_type()) {
                Some(definition) => {
                    let definition = definition.clone();
                    self.apply(&definition, &command, &mut trace).await
                }
                None => {
                    trace.enter(ProcessingState::Rejected);
                    let reason = DomainError::UnknownAggregateType(
                        command.aggregate_type().to_string(),
                    )
                    .to_string();
                    Terminal::new(ProcessingState::Rejected, None, Some(reason))
                }
            },
        };

        if let Some(version) = terminal.version {
            Span::current().record("version", version.value());
        }
        match &request_id {
            Some(request_id) => {
                let ack = Self::acknowledgment(request_id.clone(), &terminal);
                self.emitter.emit(&ack).await;
            }
            None => warn!("command without request id cannot be acknowledged"),
        }

        CommandOutcome {
            request_id,
            state: terminal.state,
            version: terminal.version,
            reason: terminal.reason,
            attempts: trace.attempts,
            path: trace.path,
        }
    }

    fn acknowledgment(request_id: RequestId, terminal: &Terminal) -> Acknowledgment {
        match (terminal.state, terminal.version) {
            (ProcessingState::Acknowledged, Some(version)) => {
                Acknowledgment::accepted(request_id, version)
            }
            (ProcessingState::DuplicateAck, version) => {
                Acknowledgment::duplicate(request_id, version)
            }
            (_, version) => {
                let mut ack = Acknowledgment::rejected(
                    request_id,
                    terminal.reason.clone().unwrap_or_default(),
                );
                ack.version = version;
                ack
            }
        }
    }

    /// 带有界重试地应用已校验的命令
    async fn apply(
        &self,
        definition: &AggregateDefinition,
        command: &Command,
        trace: &mut Trace,
    ) -> Terminal {
        let config = definition.config();
        let policy = &self.config.retry;
        let mut attempt = 0;

        let (version, mut error) = loop {
            attempt += 1;
            trace.attempts += 1;
            let step = {
                let _guard = self
                    .locks
                    .acquire(config.name(), command.aggregate_id())
                    .await;
                self.attempt(definition, command, trace).await
            };

            match step {
                Step::Done(terminal) => return terminal,
                Step::Published(version) => {
                    return Terminal::new(ProcessingState::Acknowledged, Some(version), None);
                }
                Step::PublishFailed(version, err) => break (version, err),
                Step::Retry(reason) => {
                    if !policy.should_retry(attempt) {
                        warn!(attempt, reason = %reason, "command retries exhausted");
                        return Terminal::new(trace.current(), None, Some(reason));
                    }
                    debug!(attempt, reason = %reason, "retrying command");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        };

        // 事件已持久化：此后只重试发布，不可取消、不回滚
        let mut publish_attempt = 1;
        loop {
            if !error.is_retryable() || !policy.should_retry(publish_attempt) {
                warn!(
                    version = version.value(),
                    error = %error,
                    "publish abandoned, leaving event to reconciler"
                );
                return Terminal::new(
                    ProcessingState::BusFailed,
                    Some(version),
                    Some(PUBLISH_PENDING.to_string()),
                );
            }
            tokio::time::sleep(policy.backoff(publish_attempt)).await;
            publish_attempt += 1;
            trace.attempts += 1;

            let _guard = self
                .locks
                .acquire(config.name(), command.aggregate_id())
                .await;
            trace.enter(ProcessingState::BusPublish);
            match self.publish_backlog(config, command.aggregate_id()).await {
                Ok(_) => {
                    trace.enter(ProcessingState::Acknowledged);
                    return Terminal::new(ProcessingState::Acknowledged, Some(version), None);
                }
                Err(err) => {
                    trace.enter(ProcessingState::BusFailed);
                    error = err;
                }
            }
        }
    }

    /// 持聚合锁执行一次：去重 → 版本解析 → 提交 → 发布
    async fn attempt(
        &self,
        definition: &AggregateDefinition,
        command: &Command,
        trace: &mut Trace,
    ) -> Step {
        let config = definition.config();
        let aggregate_id = command.aggregate_id();

        trace.enter(ProcessingState::Deduplicating);
        let snapshot = match self
            .bounded("load_latest", self.store.load_latest(config, aggregate_id))
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                trace.enter(ProcessingState::StoreFailed);
                warn!(error = %err, "aggregate store read failed");
                return Step::store_fault(err);
            }
        };

        let applied = self
            .bounded(
                "find_event_by_request",
                self.guard.find_applied(
                    config,
                    snapshot.as_ref(),
                    aggregate_id,
                    command.request_id(),
                ),
            )
            .await;
        match applied {
            Ok(Some(applied)) => {
                trace.enter(ProcessingState::DuplicateAck);
                info!(version = applied.version.value(), "duplicate request");
                if applied.event.as_ref().is_some_and(|e| !e.published) {
                    if let Err(err) = self.publish_backlog(config, aggregate_id).await {
                        warn!(error = %err, "re-driving publish of duplicate failed");
                    }
                }
                return Step::Done(Terminal::new(
                    ProcessingState::DuplicateAck,
                    Some(applied.version),
                    Some(Acknowledgment::DUPLICATE_REASON.to_string()),
                ));
            }
            Ok(None) => {}
            Err(err) => {
                trace.enter(ProcessingState::StoreFailed);
                warn!(error = %err, "aggregate store read failed");
                return Step::store_fault(err);
            }
        }

        trace.enter(ProcessingState::Versioning);
        let version = match self
            .resolver
            .next_version(snapshot.as_ref(), command.operation())
        {
            Ok(version) => version,
            Err(conflict) => {
                trace.enter(ProcessingState::VersionConflict);
                info!(reason = %conflict, "version conflict");
                return Step::Done(Terminal::new(
                    ProcessingState::VersionConflict,
                    None,
                    Some(conflict.to_string()),
                ));
            }
        };
        let expected_prior = snapshot.as_ref().map_or(Version::INITIAL, |s| s.version);
        let state = self.resolver.derive_state(
            snapshot.as_ref(),
            command,
            definition.capabilities().derive,
        );
        let event = Event::from_command(command, version, state);

        trace.enter(ProcessingState::StoreCommit);
        let committed = self
            .bounded(
                "commit_event",
                self.store.commit_event(config, &event, expected_prior),
            )
            .await;
        match committed {
            Ok(()) => {
                self.guard
                    .remember(config, aggregate_id, command.request_id(), version);
                debug!(version = version.value(), "event committed");
            }
            Err(DomainError::VersionConflict { actual, .. }) => {
                trace.enter(ProcessingState::VersionConflict);
                let conflict = self
                    .resolver
                    .stale(expected_prior, Version::from_value(actual));
                debug!(reason = %conflict, "concurrent commit detected");
                return Step::Retry(conflict.to_string());
            }
            Err(err) => {
                trace.enter(ProcessingState::StoreFailed);
                warn!(error = %err, "store commit failed");
                return Step::store_fault(err);
            }
        }

        trace.enter(ProcessingState::BusPublish);
        match self.publish_backlog(config, aggregate_id).await {
            Ok(_) => {
                trace.enter(ProcessingState::Acknowledged);
                info!(version = version.value(), "command acknowledged");
                Step::Published(version)
            }
            Err(err) => {
                trace.enter(ProcessingState::BusFailed);
                warn!(version = version.value(), error = %err, "event publish failed");
                Step::PublishFailed(version, err)
            }
        }
    }

    /// 按版本顺序发布并标记某聚合的全部未发布事件，返回本次发布条数
    ///
    /// 调用方必须持有该聚合的锁。
    pub(super) async fn publish_backlog(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> DomainResult<usize> {
        let limit = self.config.reconcile_batch.max(1);
        let mut published = 0;

        loop {
            let batch = self
                .bounded(
                    "fetch_unpublished",
                    self.store.fetch_unpublished(config, Some(aggregate_id), limit),
                )
                .await?;
            let fetched = batch.len();

            for event in batch {
                let message = event.to_message()?;
                let receipt = self
                    .bounded(
                        "publish",
                        self.event_bus.publish(config.event_topic(), &message),
                    )
                    .await?;
                self.bounded(
                    "mark_published",
                    self.store
                        .mark_published(config, aggregate_id, event.version()),
                )
                .await?;
                if receipt == PublishReceipt::Duplicate {
                    debug!(
                        key = %event.idempotency_key(),
                        "event already on the bus, marked published"
                    );
                }
                published += 1;
            }

            if fetched < limit {
                return Ok(published);
            }
        }
    }

    /// 适配器调用超时：按适配器错误处理
    pub(super) async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DomainResult<T>>,
    ) -> DomainResult<T> {
        let after = self.config.adapter_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| DomainError::Timeout {
                operation,
                after_ms: after.as_millis(),
            })?
    }
}
