//! 聚合版本解析（VersioningResolver）
//!
//! 计算命令应用后的新版本并识别冲突；同时派生新的快照状态。
//!
use crate::model::{Aggregate, Command, Operation};
use crate::registry::DeriveFn;
use crate::value_object::Version;
use serde_json::{Map, Value};
use thiserror::Error;

/// 版本冲突
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("aggregate already exists at {actual}")]
    AlreadyExists { actual: Version },
    #[error("aggregate does not exist")]
    NotFound,
    #[error("aggregate was deleted at {actual}")]
    Deleted { actual: Version },
    #[error("stale version: expected {expected}, actual {actual}")]
    Stale { expected: Version, actual: Version },
}

impl ConflictKind {
    /// 仅并发推进导致的过期可以通过重读解决
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConflictKind::Stale { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VersioningResolver;

impl VersioningResolver {
    /// 计算下一版本
    ///
    /// Create 要求聚合从未存在；Update/Delete 要求聚合存在且未删除。
    pub fn next_version(
        &self,
        current: Option<&Aggregate>,
        operation: Operation,
    ) -> Result<Version, ConflictKind> {
        match (operation, current) {
            (Operation::Create, None) => Ok(Version::INITIAL.next()),
            (Operation::Create, Some(s)) if s.deleted => {
                Err(ConflictKind::Deleted { actual: s.version })
            }
            (Operation::Create, Some(s)) => Err(ConflictKind::AlreadyExists { actual: s.version }),
            (_, None) => Err(ConflictKind::NotFound),
            (_, Some(s)) if s.deleted => Err(ConflictKind::Deleted { actual: s.version }),
            (_, Some(s)) => Ok(s.version.next()),
        }
    }

    /// 存储 CAS 失败时的冲突
    pub fn stale(&self, expected: Version, actual: Version) -> ConflictKind {
        ConflictKind::Stale { expected, actual }
    }

    /// 派生新快照状态
    ///
    /// - Create：取负载（或注册的派生函数结果，前序状态为 null）；
    /// - Update：负载按 JSON Merge Patch 合并进前序状态（null 删除键），或调用派生函数；
    /// - Delete：保留前序状态。
    pub fn derive_state(
        &self,
        prior: Option<&Aggregate>,
        command: &Command,
        derive: Option<DeriveFn>,
    ) -> Value {
        let prior_state = prior.map_or(&Value::Null, |s| &s.state);
        match (command.operation(), derive) {
            (Operation::Delete, _) => prior_state.clone(),
            (_, Some(derive)) => derive(prior_state, command),
            (Operation::Create, None) => command.payload().clone(),
            (Operation::Update, None) => {
                let mut state = prior_state.clone();
                merge_patch(&mut state, command.payload());
                state
            }
        }
    }
}

fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
