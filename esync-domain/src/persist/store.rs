//! 聚合存储（AggregateStore）协议
//!
//! 每个聚合类型两类逻辑集合：最新快照与只追加的事件历史。
//! `commit_event` 对事件记录与快照的 `version`/`lastRequestId` 原子生效，
//! 并以期望的前序版本做乐观并发检查（CAS）。
//!
//! 事件历史同时充当发件箱：`published` 标记尚未确认发布到总线的事件，
//! 由对账任务补发。
//!
use crate::error::DomainResult as Result;
use crate::model::{Aggregate, AggregateId, Event, RequestId};
use crate::registry::AggregateTypeConfig;
use crate::value_object::Version;
use async_trait::async_trait;
use std::sync::Arc;

/// 事件历史中的一条记录
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event: Event,
    pub published: bool,
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// 读取最新快照；不存在时返回 `None`（墓碑快照仍会返回）
    async fn load_latest(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Aggregate>>;

    /// 原子提交事件与新快照
    ///
    /// 当前版本不等于 `expected_prior` 时返回 `DomainError::VersionConflict`，
    /// 且不产生任何写入。
    async fn commit_event(
        &self,
        config: &AggregateTypeConfig,
        event: &Event,
        expected_prior: Version,
    ) -> Result<()>;

    /// 在事件历史中查找某请求产生的事件
    async fn find_event_by_request(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> Result<Option<StoredEvent>>;

    /// 拉取尚未发布的事件，按 `(aggregate_id, version)` 升序
    async fn fetch_unpublished(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<Event>>;

    /// 存在未发布事件的聚合，按 ID 升序、严格位于游标 `after` 之后，至多 `limit` 个
    async fn pending_aggregates(
        &self,
        config: &AggregateTypeConfig,
        after: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<AggregateId>>;

    /// 标记事件已发布（幂等）
    async fn mark_published(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<()>;
}

#[async_trait]
impl<T> AggregateStore for Arc<T>
where
    T: AggregateStore + ?Sized,
{
    async fn load_latest(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Aggregate>> {
        (**self).load_latest(config, aggregate_id).await
    }

    async fn commit_event(
        &self,
        config: &AggregateTypeConfig,
        event: &Event,
        expected_prior: Version,
    ) -> Result<()> {
        (**self).commit_event(config, event, expected_prior).await
    }

    async fn find_event_by_request(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> Result<Option<StoredEvent>> {
        (**self)
            .find_event_by_request(config, aggregate_id, request_id)
            .await
    }

    async fn fetch_unpublished(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        (**self).fetch_unpublished(config, aggregate_id, limit).await
    }

    async fn pending_aggregates(
        &self,
        config: &AggregateTypeConfig,
        after: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<AggregateId>> {
        (**self).pending_aggregates(config, after, limit).await
    }

    async fn mark_published(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<()> {
        (**self).mark_published(config, aggregate_id, version).await
    }
}
