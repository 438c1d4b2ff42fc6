//! 幂等守卫（IdempotencyGuard）
//!
//! 判定某请求是否已对目标聚合产生过事件，依次检查：
//! 1. 最新快照的 `lastRequestId`；
//! 2. 本进程最近提交过的请求窗口（有界，FIFO 淘汰）；
//! 3. 存储中的事件历史。
//!
//! 提交成功后必须调用 `remember`，保证读己之写：同一请求再次到达时一定命中。
//!
use crate::error::DomainResult;
use crate::model::{Aggregate, AggregateId, RequestId};
use crate::persist::{AggregateStore, StoredEvent};
use crate::registry::AggregateTypeConfig;
use crate::value_object::Version;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// 有界键值窗口：超出容量时淘汰最早插入的键
#[derive(Debug)]
pub struct BoundedWindow<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> BoundedWindow<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// 插入；键已存在时仅更新值，不改变淘汰顺序
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type RequestKey = (String, AggregateId, RequestId);

/// 最近提交的请求 → 产生的版本
pub type RecentRequests = BoundedWindow<RequestKey, Version>;

/// 已应用请求的查询结果
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRequest {
    /// 该请求产生的版本
    pub version: Version,
    /// 事件历史中的记录（用于补发布）；历史中查不到时为 `None`
    pub event: Option<StoredEvent>,
}

pub struct IdempotencyGuard {
    store: Arc<dyn AggregateStore>,
    recent: Mutex<RecentRequests>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn AggregateStore>, capacity: usize) -> Self {
        Self {
            store,
            recent: Mutex::new(RecentRequests::new(capacity)),
        }
    }

    pub async fn already_applied(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> DomainResult<bool> {
        let snapshot = self.store.load_latest(config, aggregate_id).await?;
        Ok(self
            .find_applied(config, snapshot.as_ref(), aggregate_id, request_id)
            .await?
            .is_some())
    }

    /// 基于调用方已读取的快照判定，命中时附带事件历史记录
    pub async fn find_applied(
        &self,
        config: &AggregateTypeConfig,
        snapshot: Option<&Aggregate>,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> DomainResult<Option<AppliedRequest>> {
        let known = snapshot
            .filter(|s| &s.last_request_id == request_id)
            .map(|s| s.version)
            .or_else(|| self.recent_version(config, aggregate_id, request_id));

        let event = self
            .store
            .find_event_by_request(config, aggregate_id, request_id)
            .await?;

        Ok(match (known, event) {
            (Some(version), event) => Some(AppliedRequest { version, event }),
            (None, Some(stored)) => Some(AppliedRequest {
                version: stored.event.version(),
                event: Some(stored),
            }),
            (None, None) => None,
        })
    }

    /// 记录一次成功提交
    pub fn remember(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
        version: Version,
    ) {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (
                    config.name().to_string(),
                    aggregate_id.clone(),
                    request_id.clone(),
                ),
                version,
            );
    }

    fn recent_version(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> Option<Version> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(
                config.name().to_string(),
                aggregate_id.clone(),
                request_id.clone(),
            ))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Command, Event, Operation};
    use crate::persist::InMemoryAggregateStore;
    use crate::registry::TopicNaming;
    use serde_json::json;

    #[test]
    fn window_evicts_oldest_first() {
        let mut window = BoundedWindow::new(2);
        window.insert("a", 1);
        window.insert("b", 2);
        window.insert("a", 10);
        window.insert("c", 3);

        assert!(!window.contains(&"a"));
        assert_eq!(window.get(&"b"), Some(&2));
        assert_eq!(window.get(&"c"), Some(&3));
        assert_eq!(window.len(), 2);
    }

    async fn commit(
        store: &InMemoryAggregateStore,
        config: &AggregateTypeConfig,
        request: &str,
        version: u64,
    ) {
        let operation = if version == 1 {
            Operation::Create
        } else {
            Operation::Update
        };
        let command = Command::builder()
            .operation(operation)
            .aggregate_type("pet")
            .aggregate_id("p1")
            .request_id(request)
            .build();
        let event = Event::from_command(&command, Version::from_value(version), json!({}));
        store
            .commit_event(config, &event, Version::from_value(version - 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn detects_latest_and_older_requests() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let config = AggregateTypeConfig::derive("pet", &TopicNaming::default());
        let guard = IdempotencyGuard::new(store.clone(), 16);
        let id = AggregateId::from("p1");

        assert!(!guard.already_applied(&config, &id, &RequestId::from("r1")).await.unwrap());

        commit(&store, &config, "r1", 1).await;
        commit(&store, &config, "r2", 2).await;

        assert!(guard.already_applied(&config, &id, &RequestId::from("r2")).await.unwrap());
        let older = guard
            .find_applied(&config, None, &id, &RequestId::from("r1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(older.version.value(), 1);
        assert!(older.event.is_some());
        assert!(!guard.already_applied(&config, &id, &RequestId::from("r3")).await.unwrap());
    }

    #[tokio::test]
    async fn remembered_requests_hit_without_history() {
        let store = Arc::new(InMemoryAggregateStore::new());
        let config = AggregateTypeConfig::derive("pet", &TopicNaming::default());
        let guard = IdempotencyGuard::new(store, 16);
        let id = AggregateId::from("p9");
        let request = RequestId::from("r9");

        guard.remember(&config, &id, &request, Version::from_value(4));
        let applied = guard
            .find_applied(&config, None, &id, &request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.version.value(), 4);
        assert!(applied.event.is_none());
    }
}
