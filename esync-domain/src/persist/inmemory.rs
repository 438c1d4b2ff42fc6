//! 内存版聚合存储（InMemoryAggregateStore）
//!
//! 快照与事件历史保存在进程内，分别按 `aggregate_collection` 与
//! `event_collection` 两个集合名存放。
//! 支持故障注入（提交失败、提交成功但响应丢失、读取失败、提交延迟），
//! 用于测试、示例与本地开发。
//!
use super::{AggregateStore, StoredEvent};
use crate::error::{DomainError, DomainResult as Result};
use crate::model::{Aggregate, AggregateId, Event, RequestId};
use crate::registry::AggregateTypeConfig;
use crate::value_object::Version;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Snapshots = HashMap<AggregateId, Aggregate>;
type History = BTreeMap<(AggregateId, Version), StoredEvent>;

#[derive(Default)]
struct Collections {
    snapshots: HashMap<String, Snapshots>,
    histories: HashMap<String, History>,
}

impl Collections {
    fn history(&self, config: &AggregateTypeConfig) -> Option<&History> {
        self.histories.get(config.event_collection())
    }
}

/// 某聚合在历史中的全部记录（按版本升序）
fn events_of<'a>(
    history: &'a History,
    aggregate_id: &'a AggregateId,
) -> impl Iterator<Item = &'a StoredEvent> + 'a {
    history
        .range((aggregate_id.clone(), Version::INITIAL)..)
        .take_while(move |((id, _), _)| id == aggregate_id)
        .map(|(_, stored)| stored)
}

#[derive(Default)]
struct Faults {
    fail_commits: usize,
    lose_commit_acks: usize,
    fail_loads: usize,
    commit_delay: Option<Duration>,
}

#[derive(Default)]
pub struct InMemoryAggregateStore {
    collections: Mutex<Collections>,
    faults: Mutex<Faults>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 `n` 次提交直接失败，不写入任何数据
    pub fn fail_next_commits(&self, n: usize) {
        lock(&self.faults).fail_commits = n;
    }

    /// 接下来 `n` 次提交写入成功，但向调用方返回错误（模拟提交后崩溃/超时）
    pub fn lose_next_commit_acks(&self, n: usize) {
        lock(&self.faults).lose_commit_acks = n;
    }

    pub fn fail_next_loads(&self, n: usize) {
        lock(&self.faults).fail_loads = n;
    }

    /// 每次提交前的人为延迟
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        lock(&self.faults).commit_delay = delay;
    }

    pub fn snapshot(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Option<Aggregate> {
        lock(&self.collections)
            .snapshots
            .get(config.aggregate_collection())
            .and_then(|snapshots| snapshots.get(aggregate_id).cloned())
    }

    /// 某聚合的完整事件历史（按版本升序）
    pub fn history(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Vec<StoredEvent> {
        lock(&self.collections)
            .history(config)
            .map(|history| events_of(history, aggregate_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn event_count(&self, config: &AggregateTypeConfig) -> usize {
        lock(&self.collections)
            .history(config)
            .map_or(0, BTreeMap::len)
    }

    pub fn unpublished_count(&self, config: &AggregateTypeConfig) -> usize {
        lock(&self.collections)
            .history(config)
            .map_or(0, |history| history.values().filter(|e| !e.published).count())
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn load_latest(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Aggregate>> {
        {
            let mut faults = lock(&self.faults);
            if faults.fail_loads > 0 {
                faults.fail_loads -= 1;
                return Err(DomainError::store("injected load failure"));
            }
        }
        Ok(self.snapshot(config, aggregate_id))
    }

    async fn commit_event(
        &self,
        config: &AggregateTypeConfig,
        event: &Event,
        expected_prior: Version,
    ) -> Result<()> {
        let (delay, lose_ack) = {
            let mut faults = lock(&self.faults);
            if faults.fail_commits > 0 {
                faults.fail_commits -= 1;
                return Err(DomainError::store("injected commit failure"));
            }
            let lose_ack = faults.lose_commit_acks > 0;
            if lose_ack {
                faults.lose_commit_acks -= 1;
            }
            (faults.commit_delay, lose_ack)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if event.version() != expected_prior.next() {
            return Err(DomainError::invalid_state(format!(
                "event version {} does not follow expected prior {}",
                event.version(),
                expected_prior
            )));
        }

        {
            let mut collections = lock(&self.collections);
            let Collections {
                snapshots,
                histories,
            } = &mut *collections;
            let snapshots = snapshots
                .entry(config.aggregate_collection().to_string())
                .or_default();

            let actual = snapshots
                .get(event.aggregate_id())
                .map_or(Version::INITIAL, |s| s.version);
            if actual != expected_prior {
                return Err(DomainError::VersionConflict {
                    aggregate_id: event.aggregate_id().to_string(),
                    expected: expected_prior.value(),
                    actual: actual.value(),
                });
            }

            snapshots.insert(event.aggregate_id().clone(), Aggregate::from_event(event));
            histories
                .entry(config.event_collection().to_string())
                .or_default()
                .insert(
                    (event.aggregate_id().clone(), event.version()),
                    StoredEvent {
                        event: event.clone(),
                        published: false,
                    },
                );
        }

        if lose_ack {
            return Err(DomainError::store("injected lost commit acknowledgment"));
        }
        Ok(())
    }

    async fn find_event_by_request(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> Result<Option<StoredEvent>> {
        let collections = lock(&self.collections);
        Ok(collections.history(config).and_then(|history| {
            events_of(history, aggregate_id)
                .find(|stored| stored.event.request_id() == request_id)
                .cloned()
        }))
    }

    async fn fetch_unpublished(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let collections = lock(&self.collections);
        let Some(history) = collections.history(config) else {
            return Ok(Vec::new());
        };
        Ok(history
            .iter()
            .filter(|((id, _), stored)| {
                !stored.published && aggregate_id.is_none_or(|wanted| wanted == id)
            })
            .take(limit)
            .map(|(_, stored)| stored.event.clone())
            .collect())
    }

    async fn pending_aggregates(
        &self,
        config: &AggregateTypeConfig,
        after: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<AggregateId>> {
        let collections = lock(&self.collections);
        let Some(history) = collections.history(config) else {
            return Ok(Vec::new());
        };

        let mut ids: Vec<AggregateId> = Vec::new();
        for ((id, _), stored) in history {
            if stored.published || after.is_some_and(|cursor| id <= cursor) {
                continue;
            }
            if ids.last() != Some(id) {
                if ids.len() == limit {
                    break;
                }
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    async fn mark_published(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<()> {
        let mut collections = lock(&self.collections);
        let stored = collections
            .histories
            .get_mut(config.event_collection())
            .and_then(|history| history.get_mut(&(aggregate_id.clone(), version)))
            .ok_or_else(|| DomainError::NotFound {
                reason: format!("event {aggregate_id}@{}", version.value()),
            })?;
        stored.published = true;
        Ok(())
    }
}
